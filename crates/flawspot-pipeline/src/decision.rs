//! Which evidence source produces the defects of a base/current
//! comparison.
//!
//! The sources are tried in [`PRECEDENCE`] order and the first whose
//! predicate holds wins. Predicates are evaluated lazily, so a source
//! later in the list is never computed once an earlier one fired.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Evidence source of a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Part-mask topology changed: material detached or missing.
    Structural,
    /// Part outline changed shape class.
    Geometry,
    /// Pixel differences only.
    PlainDiff,
}

/// Evaluation order. `PlainDiff` is the fallback and always applies.
pub const PRECEDENCE: [Route; 3] = [Route::Structural, Route::Geometry, Route::PlainDiff];

impl Route {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Structural => "structural",
            Self::Geometry => "geometry",
            Self::PlainDiff => "plain_diff",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First route in [`PRECEDENCE`] for which `fires` holds.
///
/// `fires` is not called for [`Route::PlainDiff`].
///
/// # Errors
///
/// Propagates the first error returned by `fires`.
pub fn route<E>(mut fires: impl FnMut(Route) -> Result<bool, E>) -> Result<Route, E> {
    for candidate in PRECEDENCE {
        if candidate == Route::PlainDiff || fires(candidate)? {
            return Ok(candidate);
        }
    }
    Ok(Route::PlainDiff)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn decide(structural: bool, geometry: bool) -> (Route, Vec<Route>) {
        let mut asked = Vec::new();
        let route = route::<()>(|r| {
            asked.push(r);
            Ok(match r {
                Route::Structural => structural,
                Route::Geometry => geometry,
                Route::PlainDiff => false,
            })
        })
        .unwrap();
        (route, asked)
    }

    #[test]
    fn structural_wins_and_skips_geometry() {
        let (route, asked) = decide(true, true);
        assert_eq!(route, Route::Structural);
        assert_eq!(asked, vec![Route::Structural]);
    }

    #[test]
    fn geometry_beats_plain_diff() {
        assert_eq!(decide(false, true).0, Route::Geometry);
    }

    #[test]
    fn plain_diff_is_the_fallback() {
        let (route, asked) = decide(false, false);
        assert_eq!(route, Route::PlainDiff);
        assert_eq!(asked, vec![Route::Structural, Route::Geometry]);
    }

    #[test]
    fn errors_stop_evaluation() {
        let mut calls = 0;
        let result = route(|_| {
            calls += 1;
            Err("boom")
        });
        assert_eq!(result, Err("boom"));
        assert_eq!(calls, 1);
    }

    #[test]
    fn names() {
        assert_eq!(Route::PlainDiff.to_string(), "plain_diff");
        assert_eq!(serde_json::to_string(&Route::Geometry).unwrap(), "\"geometry\"");
    }
}
