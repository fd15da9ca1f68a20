use itertools::Itertools;
use tracing::warn;

use crate::{
    cli::{AppVersion, Args},
    client::EndpointConfig,
    payload::AppVersions,
};

pub const DEFAULT_API: &str = "http://fleet.intra.touchtones.example.com:6565";

/// Sent in place of an auth token when none was configured.
pub const TOKEN_PLACEHOLDER: &str = "<required>";

/// Everything one batch needs, resolved from the command line and environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub endpoint: EndpointConfig,
    pub workers: usize,
    pub apps: AppVersions,
}

impl BatchConfig {
    pub fn from_args(args: &Args, apps: &[AppVersion], hostname: String) -> Self {
        let token = match &args.token {
            Some(t) => t.clone(),
            None => {
                warn!("TOUCHTUNES_AUTH_TOKEN should be defined.");
                TOKEN_PLACEHOLDER.to_owned()
            }
        };

        let apps = apps
            .iter()
            .map(|a| (a.application_id.clone(), a.version.clone()))
            .collect();

        Self {
            endpoint: EndpointConfig {
                api: args.api.clone(),
                hostname,
                token,
            },
            workers: args.workers,
            apps,
        }
    }

    /// One-line description for logs. Leaves out the token.
    pub fn describe(&self) -> String {
        format!(
            "api={} client_id={} workers={} apps=[{}]",
            self.endpoint.api,
            self.endpoint.hostname,
            self.workers,
            self.apps
                .iter()
                .map(|(app, version)| format!("{app}={version}"))
                .format(", ")
        )
    }
}
