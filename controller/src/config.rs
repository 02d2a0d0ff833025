//! The Config Store: a single current [`ControllerConfig`] value,
//! replaceable atomically. The operator and the pod reconciler both read it
//! on every invocation; the config watch handler is the only writer.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use owo_colors::OwoColorize;
use serde::Deserialize;

use crate::util::Error;

/// Hot-reloadable controller configuration. `executor_image` has no
/// `#[serde(default)]`: a payload missing it fails to deserialize, rejecting
/// the update before it ever reaches the store.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControllerConfig {
    pub executor_image: String,
    #[serde(default)]
    pub artifact_repository: serde_json::Value,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
    /// When set, added as an extra conjunctive label selector
    /// (`workflows.argoproj.io/controller-instanceid=<id>`) on every watch,
    /// letting more than one controller instance share a cluster.
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl ControllerConfig {
    /// Parses the raw document body (YAML or JSON; YAML is a superset) of a
    /// ConfigMap's `config` data key.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Returns the label selector conjuncts this config adds to every watch:
    /// `matchLabels` plus, if set, the controller-instanceid label.
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.match_labels.clone();
        if let Some(id) = &self.instance_id {
            labels.insert(
                wfctl_common::annotations::LABEL_CONTROLLER_INSTANCEID.to_string(),
                id.clone(),
            );
        }
        labels
    }
}

/// Holds the live config behind an atomically-swapped pointer so readers
/// observe a consistent snapshot without ever holding a lock across a
/// read-then-use — `load()` returns an owned `Arc` and the writer never
/// blocks a reader.
#[derive(Default)]
pub struct ConfigStore {
    inner: ArcSwapOption<ControllerConfig>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            inner: ArcSwapOption::empty(),
        }
    }

    /// Current config, if one has ever been successfully loaded.
    pub fn load(&self) -> Option<Arc<ControllerConfig>> {
        self.inner.load_full()
    }

    /// Validates and installs `raw` as the new config. On any failure
    /// (absent, malformed, missing `executorImage`) the previous config
    /// remains in effect and the error is returned for the caller to log —
    /// it is never surfaced to the watch loop as a reason to stop.
    pub fn update(&self, raw: Option<&str>) -> Result<(), Error> {
        let raw = raw.ok_or_else(|| Error::UserInput("config payload is absent".to_string()))?;
        let parsed = ControllerConfig::parse(raw)?;
        if parsed.executor_image.trim().is_empty() {
            return Err(Error::UserInput(
                "config is missing required field executorImage".to_string(),
            ));
        }
        println!(
            "{}",
            format!(
                "⚙️  config updated • executorImage={} namespace={}",
                parsed.executor_image,
                if parsed.namespace.is_empty() {
                    "(all)"
                } else {
                    &parsed.namespace
                }
            )
            .green()
        );
        self.inner.store(Some(Arc::new(parsed)));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_config_missing_executor_image() {
        let store = ConfigStore::new();
        let err = store.update(Some("namespace: argo\n")).unwrap_err();
        assert!(matches!(err, Error::Json { .. } | Error::Yaml { .. } | Error::UserInput(_)));
        assert!(store.load().is_none());
    }

    #[test]
    fn keeps_previous_config_on_rejected_update() {
        let store = ConfigStore::new();
        store
            .update(Some("executorImage: argoexec:v3\n"))
            .expect("valid config accepted");
        let before = store.load().unwrap();

        let err = store.update(Some("namespace: argo\n"));
        assert!(err.is_err());

        let after = store.load().unwrap();
        assert_eq!(before.executor_image, after.executor_image);
        assert_eq!(after.executor_image, "argoexec:v3");
    }

    #[test]
    fn rejects_absent_payload() {
        let store = ConfigStore::new();
        assert!(store.update(None).is_err());
        assert!(store.load().is_none());
    }

    #[test]
    fn instance_id_becomes_selector_label() {
        let cfg = ControllerConfig::parse(
            "executorImage: argoexec:v3\ninstanceId: prod\nmatchLabels:\n  team: data\n",
        )
        .unwrap();
        let labels = cfg.selector_labels();
        assert_eq!(labels.get("team"), Some(&"data".to_string()));
        assert_eq!(
            labels.get(wfctl_common::annotations::LABEL_CONTROLLER_INSTANCEID),
            Some(&"prod".to_string())
        );
    }
}
