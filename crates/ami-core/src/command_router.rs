//! Routing from command text to output parsers.
//!
//! `reduce` output has no type information, so which fact a response carries is
//! inferred from the command that was sent. The table below is matched by
//! substring; every matching route applies.

use crate::dataset_registry::FieldUpdate;
use crate::output_parser;
use ami_proto::{DatasetId, ParseError};

/// Which extractor a route feeds the output through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Rain-gauge amplitude correction (`rain`).
    RainCorrection,
    /// Running maximum of flagged samples (any flagging command).
    FlaggedMax,
    /// Noise estimate from reweighting (`reweight`).
    EstimatedNoise,
}

/// One row of the routing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// Substring of the command that selects this route.
    pub pattern: &'static str,
    pub kind: RouteKind,
}

impl RouteKind {
    /// Runs the extractor for this route.
    ///
    /// Returns `Ok(None)` when an optional fact is absent.
    pub fn extract(
        self,
        dataset: Option<&DatasetId>,
        block: &str,
    ) -> Result<Option<FieldUpdate>, ParseError> {
        match self {
            RouteKind::RainCorrection => {
                output_parser::parse_rain_correction(dataset, block)
                    .map(|factor| Some(FieldUpdate::RainCorrection(factor)))
            }
            RouteKind::FlaggedMax => Ok(output_parser::parse_flagging(dataset, block)?
                .map(FieldUpdate::FlaggedMax)),
            RouteKind::EstimatedNoise => output_parser::parse_noise(dataset, block)
                .map(|noise| Some(FieldUpdate::EstimatedNoise(noise))),
        }
    }
}

/// Substring routing table from commands to extractors.
#[derive(Debug, Clone)]
pub struct CommandRouter {
    routes: Vec<Route>,
}

impl Default for CommandRouter {
    fn default() -> Self {
        Self {
            routes: vec![
                Route {
                    pattern: "rain",
                    kind: RouteKind::RainCorrection,
                },
                Route {
                    pattern: "flag",
                    kind: RouteKind::FlaggedMax,
                },
                Route {
                    pattern: "reweight",
                    kind: RouteKind::EstimatedNoise,
                },
            ],
        }
    }
}

impl CommandRouter {
    /// Creates the standard table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the routes that apply to a command, in table order.
    pub fn routes_for<'a>(&'a self, command: &'a str) -> impl Iterator<Item = RouteKind> + 'a {
        self.routes
            .iter()
            .filter(move |route| command.contains(route.pattern))
            .map(|route| route.kind)
    }

    /// Runs every matching extractor over the output of `command`.
    ///
    /// A failing mandatory extractor aborts the whole dispatch.
    pub fn dispatch(
        &self,
        command: &str,
        dataset: Option<&DatasetId>,
        block: &str,
    ) -> Result<Vec<FieldUpdate>, ParseError> {
        let mut updates = Vec::new();
        for kind in self.routes_for(command) {
            if let Some(update) = kind.extract(dataset, block)? {
                updates.push(update);
            }
        }
        Ok(updates)
    }

    /// Returns the table rows.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ami_proto::ParseKind;

    #[test]
    fn test_routes_by_substring() {
        let router = CommandRouter::new();
        let kinds = |cmd: &str| router.routes_for(cmd).collect::<Vec<_>>();

        assert_eq!(kinds(r"rain \ "), vec![RouteKind::RainCorrection]);
        assert_eq!(kinds(r"flag amp 0.1 \ "), vec![RouteKind::FlaggedMax]);
        assert_eq!(kinds(r"show flagging no yes \ "), vec![RouteKind::FlaggedMax]);
        assert_eq!(kinds(r"reweight \ "), vec![RouteKind::EstimatedNoise]);
        assert!(kinds(r"list files \ ").is_empty());
    }

    #[test]
    fn test_multiple_routes_can_match() {
        let router = CommandRouter::new();
        let kinds: Vec<_> = router.routes_for("flag rain").collect();
        assert_eq!(kinds, vec![RouteKind::RainCorrection, RouteKind::FlaggedMax]);
    }

    #[test]
    fn test_unmatched_command_updates_nothing() {
        let router = CommandRouter::new();
        let updates = router.dispatch("smooth 5", None, "anything at all").unwrap();
        assert!(updates.is_empty());
    }

    #[test]
    fn test_dispatch_rain() {
        let router = CommandRouter::new();
        let updates = router
            .dispatch("rain", None, "Mean amplitude correction factor 0.98")
            .unwrap();
        assert_eq!(updates, vec![FieldUpdate::RainCorrection(0.98)]);
    }

    #[test]
    fn test_dispatch_flagging_without_summary_is_empty() {
        let router = CommandRouter::new();
        let updates = router.dispatch("flag shadow", None, "done").unwrap();
        assert!(updates.is_empty());
    }

    #[test]
    fn test_dispatch_missing_mandatory_fact_fails() {
        let router = CommandRouter::new();
        let dataset = DatasetId::new("A-1.raw");
        let err = router
            .dispatch("reweight", Some(&dataset), "reweighting done")
            .unwrap_err();
        assert_eq!(err.kind, ParseKind::Noise);
        assert_eq!(err.dataset, Some(dataset));
    }

    #[test]
    fn test_table_is_inspectable() {
        let router = CommandRouter::new();
        let patterns: Vec<_> = router.routes().iter().map(|r| r.pattern).collect();
        assert_eq!(patterns, vec!["rain", "flag", "reweight"]);
    }
}
