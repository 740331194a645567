//! The distribution report wire format.
//!
//! Reports travel as YAML documents inside configmaps labeled with
//! [`REPORT_LABEL`], under the [`REPORT_DATA_FIELD`] data key. Resource
//! keys use the canonical `kind:namespace:name` form (reporters may
//! append a resource version as a fourth token).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label identifying a configmap as a distribution report.
pub const REPORT_LABEL: &str = "mesh.io/distribution-report";

/// Configmap data key holding the report document.
pub const REPORT_DATA_FIELD: &str = "distribution-report";

/// One reporter's view of distribution progress.
///
/// `in_progress_resources` maps resource keys to the number of data
/// plane instances that have acked them; `data_plane_count` is the total
/// the reporter manages. The map is ordered so rendering is stable.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionReport {
    /// Identity of the reporting data-plane controller instance.
    pub reporter: String,
    /// Total data plane instances under this reporter.
    pub data_plane_count: usize,
    /// Acked instance count per resource key.
    pub in_progress_resources: BTreeMap<String, usize>,
}

impl DistributionReport {
    /// Parse a report from its YAML document.
    pub fn from_yaml(data: &str) -> Result<DistributionReport, serde_yaml::Error> {
        serde_yaml::from_str(data)
    }

    /// Render the report as YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DistributionReport {
        DistributionReport {
            reporter: "dpc-1".to_string(),
            data_plane_count: 5,
            in_progress_resources: [
                ("virtual-service:default:reviews".to_string(), 3),
                ("gateway:prod:edge".to_string(), 5),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn yaml_round_trip() {
        let report = sample();
        let yaml = report.to_yaml().unwrap();
        let parsed = DistributionReport::from_yaml(&yaml).unwrap();
        assert_eq!(report, parsed);
    }

    #[test]
    fn rendering_is_stable() {
        // Two successive renderings of the same report must be
        // byte-identical; the ordered map guarantees it.
        let report = sample();
        let first = report.to_yaml().unwrap();
        let second = report.to_yaml().unwrap();
        assert_eq!(first, second);

        let reparsed = DistributionReport::from_yaml(&first).unwrap();
        assert_eq!(reparsed.to_yaml().unwrap(), first);
    }

    #[test]
    fn parses_camel_case_fields() {
        let yaml = "reporter: dpc-2\ndataPlaneCount: 3\ninProgressResources:\n  sidecar:ns:default: 2\n";
        let report = DistributionReport::from_yaml(yaml).unwrap();
        assert_eq!(report.reporter, "dpc-2");
        assert_eq!(report.data_plane_count, 3);
        assert_eq!(
            report.in_progress_resources.get("sidecar:ns:default"),
            Some(&2)
        );
    }

    #[test]
    fn malformed_reports_are_rejected() {
        assert!(DistributionReport::from_yaml("dataPlaneCount: [not a number]").is_err());
    }
}
