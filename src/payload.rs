use std::{collections::BTreeMap, fmt::Display, sync::Arc};

use serde::Serialize;

/// Application id to target version. A [BTreeMap] so that the generated
/// payload always lists applications in the same order.
pub type AppVersions = BTreeMap<String, String>;

#[derive(Debug, thiserror::Error)]
#[error("Failed to serialize update payload: {0}")]
pub struct PayloadError(#[from] serde_json::Error);

#[derive(Debug, Serialize)]
struct ApplicationUpdate<'a> {
    profile: ApplicationProfile<'a>,
}

#[derive(Debug, Serialize)]
struct ApplicationProfile<'a> {
    applications: Vec<ApplicationSpec<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationSpec<'a> {
    application_id: &'a str,
    version: &'a str,
}

impl<'a> ApplicationUpdate<'a> {
    fn new(apps: &'a AppVersions) -> Self {
        Self {
            profile: ApplicationProfile {
                applications: apps
                    .iter()
                    .map(|(application_id, version)| ApplicationSpec {
                        application_id,
                        version,
                    })
                    .collect(),
            },
        }
    }
}

/// The serialized request body shared by every worker in a batch.
///
/// Cloning is cheap and never copies the underlying bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdatePayload {
    body: Arc<[u8]>,
    pretty: Arc<str>,
}

impl UpdatePayload {
    pub fn build(apps: &AppVersions) -> Result<Self, PayloadError> {
        let doc = ApplicationUpdate::new(apps);
        let body = serde_json::to_vec(&doc)?;
        let pretty = serde_json::to_string_pretty(&doc)?;
        Ok(Self {
            body: body.into(),
            pretty: pretty.into(),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Owned copy of the body, for handing to the HTTP client.
    pub fn to_vec(&self) -> Vec<u8> {
        self.body.to_vec()
    }
}

/// Pretty-printed form, only used for logging.
impl Display for UpdatePayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.pretty)
    }
}
