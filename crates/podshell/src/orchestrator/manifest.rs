//! Pod manifest construction and validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::error::{OrchestratorError, OrchestratorResult};

/// Label carrying the application name on every pod we create.
pub const APP_LABEL: &str = "app";

/// Label carrying the owning session id.
pub const SESSION_LABEL: &str = "podshell.io/session";

/// Label carrying the (sanitised) owning user id.
pub const USER_LABEL: &str = "podshell.io/user";

/// Value of [`APP_LABEL`].
pub const APP_NAME: &str = "podshell";

/// CPU and memory requests/limits for the sandbox container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub cpu_request: String,
    pub cpu_limit: String,
    pub memory_request: String,
    pub memory_limit: String,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpu_request: "100m".to_string(),
            cpu_limit: "500m".to_string(),
            memory_request: "128Mi".to_string(),
            memory_limit: "512Mi".to_string(),
        }
    }
}

/// Declarative description of a sandbox pod.
///
/// The pod never restarts and carries a hard deadline, so the orchestrator
/// reaps it even if this process forgets about it.
#[derive(Debug, Clone)]
pub struct PodManifest {
    /// Prefix for the orchestrator-generated pod name.
    pub name_prefix: String,
    /// Container image to run.
    pub image: String,
    /// Name of the single container in the pod.
    pub container_name: String,
    /// Container entrypoint. Keeps the pod alive between exec calls.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: BTreeMap<String, String>,
    /// Working directory inside the container.
    pub workdir: String,
    /// Pod labels.
    pub labels: BTreeMap<String, String>,
    /// Resource requests and limits.
    pub resources: ResourceSpec,
    /// Hard deadline after which the orchestrator kills the pod.
    pub active_deadline_seconds: u64,
    /// Service account the pod runs as.
    pub service_account: Option<String>,
}

impl PodManifest {
    /// Create a manifest for the given image with sandbox defaults.
    pub fn new(image: impl Into<String>) -> Self {
        let mut labels = BTreeMap::new();
        labels.insert(APP_LABEL.to_string(), APP_NAME.to_string());
        Self {
            name_prefix: "sandbox-".to_string(),
            image: image.into(),
            container_name: "sandbox".to_string(),
            command: vec!["sleep".to_string(), "infinity".to_string()],
            env: BTreeMap::new(),
            workdir: "/workspace".to_string(),
            labels,
            resources: ResourceSpec::default(),
            active_deadline_seconds: 1800,
            service_account: None,
        }
    }

    /// Set the generated-name prefix.
    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = prefix.into();
        self
    }

    /// Set the container name.
    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.container_name = name.into();
        self
    }

    /// Set the entrypoint.
    pub fn command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    /// Add an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the working directory.
    pub fn workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = workdir.into();
        self
    }

    /// Add a label.
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Set resource requests and limits.
    pub fn resources(mut self, resources: ResourceSpec) -> Self {
        self.resources = resources;
        self
    }

    /// Set the hard deadline.
    pub fn active_deadline_seconds(mut self, seconds: u64) -> Self {
        self.active_deadline_seconds = seconds;
        self
    }

    /// Set the service account.
    pub fn service_account(mut self, account: impl Into<String>) -> Self {
        self.service_account = Some(account.into());
        self
    }

    /// Validate all manifest fields before submitting.
    pub fn validate(&self) -> OrchestratorResult<()> {
        validate_image_name(&self.image)?;
        validate_name_prefix(&self.name_prefix)?;
        validate_dns_label(&self.container_name, "container name")?;
        validate_container_path(&self.workdir)?;

        if self.command.is_empty() {
            return Err(OrchestratorError::InvalidInput(
                "container command cannot be empty".to_string(),
            ));
        }

        if self.active_deadline_seconds == 0 {
            return Err(OrchestratorError::InvalidInput(
                "active deadline must be at least one second".to_string(),
            ));
        }

        for key in self.env.keys() {
            validate_env_var_key(key)?;
        }

        for value in self.labels.values() {
            validate_label_value(value)?;
        }

        for quantity in [
            &self.resources.cpu_request,
            &self.resources.cpu_limit,
            &self.resources.memory_request,
            &self.resources.memory_limit,
        ] {
            validate_quantity(quantity)?;
        }

        if let Some(ref account) = self.service_account {
            validate_dns_label(account, "service account")?;
        }

        Ok(())
    }

    /// Render the manifest as a Kubernetes `v1/Pod` document.
    pub fn to_json(&self) -> Value {
        let env: Vec<Value> = self
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();

        let mut spec = json!({
            "restartPolicy": "Never",
            "activeDeadlineSeconds": self.active_deadline_seconds,
            "automountServiceAccountToken": false,
            "containers": [{
                "name": self.container_name,
                "image": self.image,
                "command": self.command,
                "workingDir": self.workdir,
                "stdin": true,
                "tty": true,
                "env": env,
                "resources": {
                    "requests": {
                        "cpu": self.resources.cpu_request,
                        "memory": self.resources.memory_request,
                    },
                    "limits": {
                        "cpu": self.resources.cpu_limit,
                        "memory": self.resources.memory_limit,
                    },
                },
            }],
        });

        if let Some(ref account) = self.service_account {
            spec["serviceAccountName"] = json!(account);
        }

        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "generateName": self.name_prefix,
                "labels": self.labels,
            },
            "spec": spec,
        })
    }
}

/// Turn an arbitrary identifier into a valid label value.
///
/// Label values allow at most 63 characters from `[A-Za-z0-9._-]` and must
/// start and end with an alphanumeric character.
pub fn sanitize_label_value(raw: &str) -> String {
    let mapped: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(63)
        .collect();

    mapped
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}

// ============================================================================
// Input Validation Functions
// ============================================================================

/// Validate a Docker/OCI image name.
///
/// Image names follow the pattern: `[registry/][namespace/]name[:tag][@digest]`
pub fn validate_image_name(image: &str) -> OrchestratorResult<()> {
    if image.is_empty() {
        return Err(OrchestratorError::InvalidInput(
            "image name cannot be empty".to_string(),
        ));
    }

    if image.len() > 256 {
        return Err(OrchestratorError::InvalidInput(
            "image name exceeds maximum length of 256 characters".to_string(),
        ));
    }

    let valid_chars = |c: char| {
        c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/' | ':' | '@')
    };

    if !image.chars().all(valid_chars) {
        return Err(OrchestratorError::InvalidInput(format!(
            "image name '{}' contains invalid characters",
            image
        )));
    }

    if image.contains("..") {
        return Err(OrchestratorError::InvalidInput(
            "image name cannot contain '..'".to_string(),
        ));
    }

    Ok(())
}

/// Validate an RFC 1123 DNS label (container names, service accounts).
pub fn validate_dns_label(name: &str, what: &str) -> OrchestratorResult<()> {
    if name.is_empty() {
        return Err(OrchestratorError::InvalidInput(format!(
            "{} cannot be empty",
            what
        )));
    }

    if name.len() > 63 {
        return Err(OrchestratorError::InvalidInput(format!(
            "{} exceeds maximum length of 63 characters",
            what
        )));
    }

    let valid_chars = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-';
    if !name.chars().all(valid_chars) {
        return Err(OrchestratorError::InvalidInput(format!(
            "{} '{}' may only contain lowercase alphanumerics and '-'",
            what, name
        )));
    }

    if name.starts_with('-') || name.ends_with('-') {
        return Err(OrchestratorError::InvalidInput(format!(
            "{} '{}' must start and end with an alphanumeric character",
            what, name
        )));
    }

    Ok(())
}

/// Validate the `generateName` prefix. The orchestrator appends a random
/// suffix, so a trailing '-' is allowed here.
fn validate_name_prefix(prefix: &str) -> OrchestratorResult<()> {
    let trimmed = prefix.strip_suffix('-').unwrap_or(prefix);
    if trimmed.len() > 57 {
        return Err(OrchestratorError::InvalidInput(
            "pod name prefix exceeds maximum length of 58 characters".to_string(),
        ));
    }
    validate_dns_label(trimmed, "pod name prefix")
}

/// Validate an environment variable key.
fn validate_env_var_key(key: &str) -> OrchestratorResult<()> {
    if key.is_empty() {
        return Err(OrchestratorError::InvalidInput(
            "environment variable key cannot be empty".to_string(),
        ));
    }

    let mut chars = key.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !first_ok {
        return Err(OrchestratorError::InvalidInput(format!(
            "environment variable key '{}' must start with a letter or underscore",
            key
        )));
    }

    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(OrchestratorError::InvalidInput(format!(
            "environment variable key '{}' contains invalid characters",
            key
        )));
    }

    Ok(())
}

/// Validate a label value.
fn validate_label_value(value: &str) -> OrchestratorResult<()> {
    if value.len() > 63 {
        return Err(OrchestratorError::InvalidInput(format!(
            "label value '{}' exceeds 63 characters",
            value
        )));
    }

    if !value.is_empty() && sanitize_label_value(value) != value {
        return Err(OrchestratorError::InvalidInput(format!(
            "label value '{}' is not a valid label value",
            value
        )));
    }

    Ok(())
}

/// Validate a resource quantity such as `500m`, `1`, `128Mi` or `1.5Gi`.
fn validate_quantity(quantity: &str) -> OrchestratorResult<()> {
    let split = quantity
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(quantity.len());
    let (number, suffix) = quantity.split_at(split);

    let number_ok = !number.is_empty()
        && number.chars().filter(|c| *c == '.').count() <= 1
        && number.chars().any(|c| c.is_ascii_digit());
    let suffix_ok = matches!(
        suffix,
        "" | "m" | "k" | "M" | "G" | "T" | "Ki" | "Mi" | "Gi" | "Ti"
    );

    if number_ok && suffix_ok {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidInput(format!(
            "invalid resource quantity '{}'",
            quantity
        )))
    }
}

/// Validate a container-internal path.
fn validate_container_path(path: &str) -> OrchestratorResult<()> {
    if !path.starts_with('/') {
        return Err(OrchestratorError::InvalidInput(
            "container path must be absolute (start with '/')".to_string(),
        ));
    }

    if path.contains('\0') {
        return Err(OrchestratorError::InvalidInput(
            "container path cannot contain null bytes".to_string(),
        ));
    }

    Ok(())
}
