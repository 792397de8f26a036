//! Adapter for AWS ECS task state change events: every container image in
//! a running task becomes a container-image scan request.

use serde::Deserialize;
use std::collections::BTreeSet;

use super::{EventAdapter, NormalizeError};
use crate::model::{ScanRequest, ScanSpec};

const SOURCE: &str = "aws.ecs";
const DETAIL_TYPE: &str = "ECS Task State Change";

/// Scanner used for discovered container images.
const IMAGE_SCAN_TYPE: &str = "trivy-image";

pub struct EcsTaskStateChange;

#[derive(Debug, Deserialize)]
struct EcsEvent {
    detail: EcsTaskDetail,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EcsTaskDetail {
    #[serde(default)]
    last_status: String,
    #[serde(default)]
    containers: Vec<EcsContainer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EcsContainer {
    #[serde(default)]
    image: String,
}

impl EventAdapter for EcsTaskStateChange {
    fn source(&self) -> &'static str {
        SOURCE
    }

    fn detail_type(&self) -> &'static str {
        DETAIL_TYPE
    }

    fn normalize(
        &self,
        raw: &serde_json::Value,
        namespace: &str,
    ) -> Result<Vec<ScanRequest>, NormalizeError> {
        let event: EcsEvent =
            serde_json::from_value(raw.clone()).map_err(|e| NormalizeError::MalformedPayload {
                source: SOURCE.to_string(),
                detail_type: DETAIL_TYPE.to_string(),
                reason: e.to_string(),
            })?;

        // Only running tasks carry images worth scanning; stop events are
        // acknowledged with an empty set.
        if event.detail.last_status != "RUNNING" {
            return Ok(Vec::new());
        }

        let images: BTreeSet<String> = event
            .detail
            .containers
            .into_iter()
            .map(|c| c.image)
            .filter(|image| !image.is_empty())
            .collect();

        Ok(images
            .into_iter()
            .map(|image| image_scan_request(&image, namespace))
            .collect())
    }
}

fn image_scan_request(image: &str, namespace: &str) -> ScanRequest {
    ScanRequest {
        // Deterministic per image, so a repeated state-change event for the
        // same image collides in the store instead of re-scanning.
        name: format!("{}-{}", IMAGE_SCAN_TYPE, slugify(image)),
        namespace: namespace.to_string(),
        labels: Default::default(),
        annotations: Default::default(),
        spec: ScanSpec {
            scan_type: IMAGE_SCAN_TYPE.to_string(),
            parameters: vec![image.to_string()],
            cascades: None,
        },
        origin: None,
    }
}

/// Collapse an image reference into a DNS-label-safe slug.
fn slugify(image: &str) -> String {
    let mut slug = String::with_capacity(image.len());
    let mut last_dash = false;
    for c in image.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash && !slug.is_empty() {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.truncate(40);
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Normalizer;

    fn running_task_event(images: &[&str]) -> String {
        let containers: Vec<String> = images
            .iter()
            .map(|i| format!(r#"{{"image": "{}", "lastStatus": "RUNNING"}}"#, i))
            .collect();
        format!(
            r#"{{
                "source": "aws.ecs",
                "detail-type": "ECS Task State Change",
                "detail": {{
                    "lastStatus": "RUNNING",
                    "containers": [{}]
                }}
            }}"#,
            containers.join(",")
        )
    }

    #[test]
    fn test_running_task_yields_image_scan_requests() {
        let normalizer = Normalizer::with_default_adapters();
        let raw = running_task_event(&["nginx:1.27", "redis:7"]);
        let requests = normalizer.normalize(&raw, "default").unwrap();

        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.spec.scan_type == "trivy-image"));
        assert!(requests
            .iter()
            .any(|r| r.spec.parameters == vec!["nginx:1.27".to_string()]));
    }

    #[test]
    fn test_duplicate_images_are_deduplicated() {
        let normalizer = Normalizer::with_default_adapters();
        let raw = running_task_event(&["nginx:1.27", "nginx:1.27"]);
        let requests = normalizer.normalize(&raw, "default").unwrap();
        assert_eq!(requests.len(), 1);
    }

    #[test]
    fn test_stopped_task_yields_nothing() {
        let normalizer = Normalizer::with_default_adapters();
        let raw = r#"{
            "source": "aws.ecs",
            "detail-type": "ECS Task State Change",
            "detail": {"lastStatus": "STOPPED", "containers": [{"image": "nginx:1.27"}]}
        }"#;
        assert!(normalizer.normalize(raw, "default").unwrap().is_empty());
    }

    #[test]
    fn test_missing_detail_is_malformed_payload() {
        let normalizer = Normalizer::with_default_adapters();
        let raw = r#"{"source": "aws.ecs", "detail-type": "ECS Task State Change"}"#;
        assert!(matches!(
            normalizer.normalize(raw, "default").unwrap_err(),
            NormalizeError::MalformedPayload { .. }
        ));
    }

    #[test]
    fn test_request_names_are_deterministic_slugs() {
        let normalizer = Normalizer::with_default_adapters();
        let raw = running_task_event(&["registry.example.com/team/app:v1.2"]);
        let requests = normalizer.normalize(&raw, "default").unwrap();
        assert_eq!(
            requests[0].name,
            "trivy-image-registry-example-com-team-app-v1-2"
        );

        let again = normalizer.normalize(&raw, "default").unwrap();
        assert_eq!(requests[0].name, again[0].name);
    }
}
