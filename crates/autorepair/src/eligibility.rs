//! Filtering pods down to the ones marked for automatic repair.

use tracing::debug;

use crate::instance::Instance;

/// A pod that passed the eligibility filter, paired with the container name
/// carried by its annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EligibleInstance {
    pub instance: Instance,
    pub requested_container: String,
}

/// Keep the pods that are `Running` and carry `annotation_key`.
///
/// Input order is preserved. An annotation with an empty value still counts
/// as present; container selection decides what to do with it.
pub fn filter_eligible(instances: &[Instance], annotation_key: &str) -> Vec<EligibleInstance> {
    instances
        .iter()
        .filter_map(|instance| {
            let Some(requested) = instance.annotation(annotation_key) else {
                debug!(
                    namespace = %instance.namespace,
                    pod = %instance.name,
                    "Skipping pod without repair annotation"
                );
                return None;
            };

            if !instance.is_running() {
                debug!(
                    namespace = %instance.namespace,
                    pod = %instance.name,
                    phase = %instance.phase,
                    "Skipping non-running pod"
                );
                return None;
            }

            Some(EligibleInstance {
                instance: instance.clone(),
                requested_container: requested.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::PodPhase;

    const KEY: &str = "cassandra-autorepair.jmkeyes.ca/autorepair";

    fn annotated(name: &str, phase: PodPhase, containers: &[&str], value: &str) -> Instance {
        Instance::new(name, "db", phase, containers).with_annotation(KEY, value)
    }

    fn names(eligible: &[EligibleInstance]) -> Vec<&str> {
        eligible.iter().map(|e| e.instance.name.as_str()).collect()
    }

    #[test]
    fn test_requires_running_phase_and_annotation() {
        let instances = vec![
            annotated("c1", PodPhase::Running, &["cassandra"], "cassandra"),
            Instance::new("c2", "db", PodPhase::Running, &["cassandra"]),
            annotated("c3", PodPhase::Pending, &["cassandra"], "cassandra"),
            annotated("c4", PodPhase::Failed, &["cassandra"], "cassandra"),
            Instance::new("c5", "db", PodPhase::Running, &["cassandra"])
                .with_annotation("other.example.com/autorepair", "cassandra"),
        ];

        let eligible = filter_eligible(&instances, KEY);
        assert_eq!(names(&eligible), vec!["c1"]);
        assert_eq!(eligible[0].requested_container, "cassandra");
    }

    #[test]
    fn test_preserves_listing_order() {
        let instances: Vec<Instance> = ["c3", "c1", "c2"]
            .iter()
            .map(|name| annotated(name, PodPhase::Running, &["cassandra"], "cassandra"))
            .collect();

        assert_eq!(
            names(&filter_eligible(&instances, KEY)),
            vec!["c3", "c1", "c2"]
        );
    }

    #[test]
    fn test_filter_is_repeatable() {
        let instances = vec![
            annotated("c1", PodPhase::Running, &["cassandra"], "cassandra"),
            annotated("c2", PodPhase::Pending, &["cassandra"], "cassandra"),
            annotated("c3", PodPhase::Running, &["a", "b"], "b"),
        ];

        assert_eq!(
            filter_eligible(&instances, KEY),
            filter_eligible(&instances, KEY)
        );
    }

    #[test]
    fn test_empty_annotation_value_is_still_eligible() {
        let instances = vec![annotated(
            "c1",
            PodPhase::Running,
            &["cassandra", "sidecar"],
            "",
        )];

        let eligible = filter_eligible(&instances, KEY);
        assert_eq!(names(&eligible), vec!["c1"]);
        assert_eq!(eligible[0].requested_container, "");
    }

    #[test]
    fn test_empty_listing() {
        assert!(filter_eligible(&[], KEY).is_empty());
    }
}
