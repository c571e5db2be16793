// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Bundle Manifests
//
// ConfigMap- and Secret-shaped YAML documents kept on local disk. A bundle is
// the unit a mount source points at; `to_payload` turns it into the file set
// the writer projects.
//
// - ConfigMap: `data` is UTF-8 text, `binaryData` is base64
// - Secret: `data` is base64, `stringData` is plain text and wins on clashes
// - Pem projection: a TLS Secret becomes a single `<name>.pem` file

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::projection::{FileProjection, Payload};

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BundleKind {
    ConfigMap,
    Secret,
}

impl std::fmt::Display for BundleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BundleKind::ConfigMap => write!(f, "ConfigMap"),
            BundleKind::Secret => write!(f, "Secret"),
        }
    }
}

/// How a bundle's keys map onto files.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMode {
    /// One file per key
    #[default]
    Keys,
    /// `<name>.pem` holding certificate then private key
    Pem,
}

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("failed to read bundle {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed bundle manifest: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("bundle {bundle}: key {key:?} is not valid base64: {source}")]
    Base64 {
        bundle: String,
        key: String,
        #[source]
        source: base64::DecodeError,
    },

    #[error("bundle {bundle}: binaryData is only valid on a ConfigMap")]
    UnexpectedBinaryData { bundle: String },

    #[error("bundle {bundle}: stringData is only valid on a Secret")]
    UnexpectedStringData { bundle: String },

    #[error("bundle {bundle}: key {key:?} appears in both data and binaryData")]
    DuplicateKey { bundle: String, key: String },

    #[error("{kind} {bundle} cannot be projected as pem; only a Secret can")]
    PemRequiresSecret { kind: BundleKind, bundle: String },

    #[error("secret {bundle} is missing {key}")]
    MissingTlsKey { bundle: String, key: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// A ConfigMap or Secret document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    #[serde(rename = "apiVersion", default = "default_api_version")]
    pub api_version: String,

    pub kind: BundleKind,

    pub metadata: BundleMetadata,

    /// Secret type, e.g. `kubernetes.io/tls`. Informational only.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,

    #[serde(default)]
    pub data: BTreeMap<String, String>,

    #[serde(rename = "binaryData", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub binary_data: BTreeMap<String, String>,

    #[serde(rename = "stringData", default, skip_serializing_if = "BTreeMap::is_empty")]
    pub string_data: BTreeMap<String, String>,
}

fn default_api_version() -> String {
    "v1".to_string()
}

impl BundleManifest {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, BundleError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, BundleError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| BundleError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// `namespace/name`, or just `name` when no namespace is set.
    pub fn qualified_name(&self) -> String {
        match &self.metadata.namespace {
            Some(ns) => format!("{}/{}", ns, self.metadata.name),
            None => self.metadata.name.clone(),
        }
    }

    /// Decoded key/value bytes, before any projection is applied.
    pub fn decoded_data(&self) -> Result<BTreeMap<String, Vec<u8>>, BundleError> {
        let mut decoded = BTreeMap::new();

        match self.kind {
            BundleKind::ConfigMap => {
                if !self.string_data.is_empty() {
                    return Err(BundleError::UnexpectedStringData {
                        bundle: self.qualified_name(),
                    });
                }
                for (key, value) in &self.data {
                    decoded.insert(key.clone(), value.clone().into_bytes());
                }
                for (key, value) in &self.binary_data {
                    if decoded.contains_key(key) {
                        return Err(BundleError::DuplicateKey {
                            bundle: self.qualified_name(),
                            key: key.clone(),
                        });
                    }
                    decoded.insert(key.clone(), self.decode_base64(key, value)?);
                }
            }
            BundleKind::Secret => {
                if !self.binary_data.is_empty() {
                    return Err(BundleError::UnexpectedBinaryData {
                        bundle: self.qualified_name(),
                    });
                }
                for (key, value) in &self.data {
                    decoded.insert(key.clone(), self.decode_base64(key, value)?);
                }
                for (key, value) in &self.string_data {
                    decoded.insert(key.clone(), value.clone().into_bytes());
                }
            }
        }

        Ok(decoded)
    }

    /// Build the payload this bundle projects to, every file with `mode`.
    pub fn to_payload(&self, mode: u32, projection: ProjectionMode) -> Result<Payload, BundleError> {
        let data = self.decoded_data()?;

        match projection {
            ProjectionMode::Keys => Ok(data
                .into_iter()
                .map(|(key, bytes)| (key, FileProjection::new(bytes, mode)))
                .collect()),
            ProjectionMode::Pem => {
                if self.kind != BundleKind::Secret {
                    return Err(BundleError::PemRequiresSecret {
                        kind: self.kind,
                        bundle: self.qualified_name(),
                    });
                }

                let cert = data.get(TLS_CERT_KEY).ok_or_else(|| BundleError::MissingTlsKey {
                    bundle: self.qualified_name(),
                    key: TLS_CERT_KEY,
                })?;
                let key = data
                    .get(TLS_PRIVATE_KEY_KEY)
                    .ok_or_else(|| BundleError::MissingTlsKey {
                        bundle: self.qualified_name(),
                        key: TLS_PRIVATE_KEY_KEY,
                    })?;

                let mut pem = Vec::with_capacity(cert.len() + key.len() + 1);
                pem.extend_from_slice(cert);
                pem.push(b'\n');
                pem.extend_from_slice(key);

                let mut payload = Payload::new();
                payload.insert(
                    format!("{}.pem", self.metadata.name),
                    FileProjection::new(pem, mode),
                );
                Ok(payload)
            }
        }
    }

    fn decode_base64(&self, key: &str, value: &str) -> Result<Vec<u8>, BundleError> {
        // Manifests often wrap long values across lines
        let compact: String = value.split_whitespace().collect();
        STANDARD.decode(compact).map_err(|source| BundleError::Base64 {
            bundle: self.qualified_name(),
            key: key.to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG_MAP: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: app-config
  namespace: default
data:
  app.properties: |
    mode=prod
  nested/settings.ini: "[main]"
binaryData:
  logo.bin: AAEC
"#;

    const TLS_SECRET: &str = r#"
apiVersion: v1
kind: Secret
type: kubernetes.io/tls
metadata:
  name: web
data:
  tls.crt: Q0VSVA==
  tls.key: S0VZ
"#;

    #[test]
    fn test_config_map_payload() {
        let bundle = BundleManifest::from_yaml_str(CONFIG_MAP).unwrap();
        assert_eq!(bundle.kind, BundleKind::ConfigMap);
        assert_eq!(bundle.qualified_name(), "default/app-config");

        let payload = bundle.to_payload(0o644, ProjectionMode::Keys).unwrap();
        assert_eq!(payload.len(), 3);
        assert_eq!(payload["app.properties"].data, b"mode=prod\n");
        assert_eq!(payload["nested/settings.ini"].data, b"[main]");
        assert_eq!(payload["logo.bin"].data, vec![0u8, 1, 2]);
        assert!(payload.values().all(|p| p.mode == 0o644));
    }

    #[test]
    fn test_secret_data_is_base64() {
        let bundle = BundleManifest::from_yaml_str(TLS_SECRET).unwrap();
        let payload = bundle.to_payload(0o600, ProjectionMode::Keys).unwrap();
        assert_eq!(payload["tls.crt"].data, b"CERT");
        assert_eq!(payload["tls.key"].data, b"KEY");
        assert_eq!(bundle.secret_type.as_deref(), Some("kubernetes.io/tls"));
    }

    #[test]
    fn test_secret_string_data_wins() {
        let yaml = r#"
kind: Secret
metadata: { name: creds }
data:
  password: b2xk
stringData:
  password: new
"#;
        let bundle = BundleManifest::from_yaml_str(yaml).unwrap();
        assert_eq!(bundle.api_version, "v1");
        let payload = bundle.to_payload(0, ProjectionMode::Keys).unwrap();
        assert_eq!(payload["password"].data, b"new");
    }

    #[test]
    fn test_pem_projection() {
        let bundle = BundleManifest::from_yaml_str(TLS_SECRET).unwrap();
        let payload = bundle.to_payload(0o600, ProjectionMode::Pem).unwrap();
        assert_eq!(payload.len(), 1);
        assert_eq!(payload["web.pem"].data, b"CERT\nKEY");
        assert_eq!(payload["web.pem"].mode, 0o600);
    }

    #[test]
    fn test_pem_requires_both_keys() {
        let yaml = r#"
kind: Secret
metadata: { name: web }
data:
  tls.crt: Q0VSVA==
"#;
        let bundle = BundleManifest::from_yaml_str(yaml).unwrap();
        let err = bundle.to_payload(0o600, ProjectionMode::Pem).unwrap_err();
        assert!(matches!(err, BundleError::MissingTlsKey { key: "tls.key", .. }));
    }

    #[test]
    fn test_pem_rejects_config_map() {
        let bundle = BundleManifest::from_yaml_str(CONFIG_MAP).unwrap();
        assert!(matches!(
            bundle.to_payload(0o600, ProjectionMode::Pem),
            Err(BundleError::PemRequiresSecret { .. })
        ));
    }

    #[test]
    fn test_bad_base64_names_the_key() {
        let yaml = r#"
kind: Secret
metadata: { name: broken }
data:
  token: "not base64!"
"#;
        let bundle = BundleManifest::from_yaml_str(yaml).unwrap();
        let err = bundle.to_payload(0, ProjectionMode::Keys).unwrap_err();
        assert!(err.to_string().contains("\"token\""));
    }

    #[test]
    fn test_wrapped_base64_is_accepted() {
        let yaml = "kind: Secret\nmetadata: { name: wrapped }\ndata:\n  blob: |\n    Q0VS\n    VA==\n";
        let bundle = BundleManifest::from_yaml_str(yaml).unwrap();
        let payload = bundle.to_payload(0, ProjectionMode::Keys).unwrap();
        assert_eq!(payload["blob"].data, b"CERT");
    }

    #[test]
    fn test_kind_specific_fields_are_rejected() {
        let yaml = "kind: Secret\nmetadata: { name: s }\nbinaryData:\n  x: AA==\n";
        let bundle = BundleManifest::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            bundle.decoded_data(),
            Err(BundleError::UnexpectedBinaryData { .. })
        ));

        let yaml = "kind: ConfigMap\nmetadata: { name: c }\ndata:\n  x: a\nbinaryData:\n  x: AA==\n";
        let bundle = BundleManifest::from_yaml_str(yaml).unwrap();
        assert!(matches!(
            bundle.decoded_data(),
            Err(BundleError::DuplicateKey { .. })
        ));
    }

    #[test]
    fn test_unknown_kind_is_a_parse_error() {
        let yaml = "kind: Deployment\nmetadata: { name: d }\n";
        assert!(matches!(
            BundleManifest::from_yaml_str(yaml),
            Err(BundleError::Parse(_))
        ));
    }
}
