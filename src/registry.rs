use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response, multipart};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::error::{Source, SyncError, SyncResult};
use crate::model::{ComponentRecord, Environment, sha256_digest};
use crate::reference::{ResourceId, ResourceKind};

pub const DEFAULT_API_URL: &str = "https://api.asterai.io";
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.asterai.io";
pub const STAGING_API_URL: &str = "https://staging.api.asterai.io";
pub const STAGING_REGISTRY_URL: &str = "https://staging.registry.asterai.io";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub const WIT_MEDIA_TYPE: &str = "application/vnd.wasm.wit.v1+wasm";
const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

/// Remote side of the sync model.
pub trait Registry {
    /// Checks the stored API key and returns the account it belongs to.
    fn validate_credential(&self) -> SyncResult<UserInfo>;
    fn fetch_environment(&self, id: &ResourceId, version: Option<&Version>)
    -> SyncResult<Environment>;
    /// Uploads `env`; the registry rejects it with a conflict when its latest
    /// version is not `env.version`.
    fn push_environment(&self, env: &Environment) -> SyncResult<PushOutcome>;
    fn delete_environment_remote(&self, id: &ResourceId) -> SyncResult<()>;
    fn list_environments_remote(&self) -> SyncResult<Vec<RemoteSummary>>;
    fn fetch_component(&self, id: &ResourceId, version: Option<&Version>)
    -> SyncResult<ComponentRecord>;
    fn push_component(&self, record: &ComponentRecord) -> SyncResult<()>;
    fn list_components_remote(&self) -> SyncResult<Vec<RemoteSummary>>;
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserInfo {
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSummary {
    pub id: ResourceId,
    pub latest_version: Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOutcome {
    pub version: Version,
    pub previous_version: Option<Version>,
    pub change_type: Option<String>,
    pub change_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEndpoints {
    pub api_url: String,
    pub registry_url: String,
    pub timeout: Duration,
}

impl Default for RegistryEndpoints {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL, DEFAULT_REGISTRY_URL)
    }
}

impl RegistryEndpoints {
    pub fn new(api_url: &str, registry_url: &str) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            registry_url: registry_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn staging() -> Self {
        Self::new(STAGING_API_URL, STAGING_REGISTRY_URL)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// wire types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnvironmentBody {
    namespace: String,
    name: String,
    version: String,
    #[serde(default)]
    components: Vec<String>,
    #[serde(default)]
    vars: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutEnvironmentRequest<'a> {
    components: Vec<String>,
    vars: &'a std::collections::BTreeMap<String, String>,
    base_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutEnvironmentResponse {
    version: String,
    previous_version: Option<String>,
    change_type: Option<String>,
    change_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryBody {
    namespace: String,
    name: String,
    latest_version: String,
}

#[derive(Debug, Deserialize)]
struct EnvironmentListBody {
    #[serde(default)]
    environments: Vec<SummaryBody>,
}

#[derive(Debug, Deserialize)]
struct ComponentListBody {
    #[serde(default)]
    components: Vec<SummaryBody>,
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    token: String,
}

#[derive(Debug, Deserialize)]
struct TagListBody {
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct OciManifest {
    layers: Vec<OciDescriptor>,
}

#[derive(Debug, Deserialize)]
struct OciDescriptor {
    #[serde(rename = "mediaType")]
    media_type: String,
    digest: String,
}

/// Registry client speaking the asterai HTTP API and OCI distribution API.
#[derive(Debug, Clone)]
pub struct HttpRegistryClient {
    endpoints: RegistryEndpoints,
    api_key: Option<String>,
    http: Client,
}

impl HttpRegistryClient {
    pub fn new(endpoints: RegistryEndpoints, api_key: Option<String>) -> SyncResult<Self> {
        let http = Client::builder()
            .timeout(endpoints.timeout)
            .build()
            .map_err(|err| SyncError::Internal(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            endpoints,
            api_key,
            http,
        })
    }

    pub fn endpoints(&self) -> &RegistryEndpoints {
        &self.endpoints
    }

    fn api_key(&self) -> SyncResult<&str> {
        self.api_key.as_deref().ok_or_else(|| {
            SyncError::Unauthorized("not logged in; run `asterai auth login <api-key>`".into())
        })
    }

    fn authorized(&self, builder: RequestBuilder) -> SyncResult<RequestBuilder> {
        let key = self.api_key()?;
        Ok(builder.header(AUTHORIZATION, format!("Bearer {key}")))
    }

    fn api(&self, path: &str) -> String {
        format!("{}{}", self.endpoints.api_url, path)
    }

    fn oci(&self, id: &ResourceId, path: &str) -> String {
        format!("{}/v2/{}/{}", self.endpoints.registry_url, id.repository(), path)
    }

    fn pull_token(&self, id: &ResourceId) -> SyncResult<String> {
        let url = self.api("/v1/registry/token");
        let scope = format!("repository:{}:pull", id.repository());
        let builder = self.authorized(self.http.get(url).query(&[("scope", scope)]))?;
        let response = send(builder, ResourceKind::Component, id)?;
        let body: TokenBody = decode(response)?;
        Ok(body.token)
    }

    fn latest_tag(&self, id: &ResourceId, token: &str) -> SyncResult<Version> {
        let builder = self
            .http
            .get(self.oci(id, "tags/list"))
            .header(AUTHORIZATION, format!("Bearer {token}"));
        let response = send(builder, ResourceKind::Component, id)?;
        let body: TagListBody = decode(response)?;
        highest_version(&body.tags)
            .ok_or_else(|| SyncError::not_found(ResourceKind::Component, id, Source::Remote))
    }

    fn download_blob(&self, id: &ResourceId, digest: &str, token: &str) -> SyncResult<Bytes> {
        let builder = self
            .http
            .get(self.oci(id, &format!("blobs/{digest}")))
            .header(AUTHORIZATION, format!("Bearer {token}"));
        let response = send(builder, ResourceKind::Component, id)?;
        let bytes = response
            .bytes()
            .map_err(|err| SyncError::Network(format!("failed to read blob {digest}: {err}")))?;
        let actual = sha256_digest(&bytes);
        if actual != digest {
            return Err(SyncError::InvalidResponse(format!(
                "digest mismatch for {id}: expected {digest}, got {actual}"
            )));
        }
        Ok(bytes)
    }
}

impl Registry for HttpRegistryClient {
    #[instrument(skip_all)]
    fn validate_credential(&self) -> SyncResult<UserInfo> {
        let builder = self.authorized(self.http.get(self.api("/v1/user")))?;
        let response = send(builder, ResourceKind::Credential, "api key")?;
        decode(response)
    }

    #[instrument(skip_all, fields(id = %id))]
    fn fetch_environment(
        &self,
        id: &ResourceId,
        version: Option<&Version>,
    ) -> SyncResult<Environment> {
        let path = match version {
            Some(version) => format!("/v1/environment/{}/{}/{version}", id.namespace(), id.name()),
            None => format!("/v1/environment/{}/{}", id.namespace(), id.name()),
        };
        let builder = self.authorized(self.http.get(self.api(&path)))?;
        let response = send(builder, ResourceKind::Environment, id)?;
        let body: EnvironmentBody = decode(response)?;

        let returned = ResourceId::new(body.namespace, body.name)
            .map_err(|err| SyncError::InvalidResponse(err.to_string()))?;
        if &returned != id {
            return Err(SyncError::InvalidResponse(format!(
                "asked for {id}, registry answered with {returned}"
            )));
        }
        let version = parse_version(&body.version)?;
        let env = Environment::from_parts(
            id,
            version,
            &body.components,
            body.vars.into_iter().collect(),
        )
        .map_err(|err| SyncError::InvalidResponse(err.to_string()))?;
        debug!(version = %env.version, components = env.components.len(), "fetched environment");
        Ok(env)
    }

    #[instrument(skip_all, fields(id = %env.display_ref()))]
    fn push_environment(&self, env: &Environment) -> SyncResult<PushOutcome> {
        let id = env.id()?;
        let request = PutEnvironmentRequest {
            components: env.component_refs(),
            vars: &env.vars,
            base_version: env.is_pushed().then(|| env.version.to_string()),
        };
        let path = format!("/v1/environment/{}/{}", id.namespace(), id.name());
        let builder = self.authorized(self.http.put(self.api(&path)).json(&request))?;
        let response = send(builder, ResourceKind::Environment, &id)?;
        let body: PutEnvironmentResponse = decode(response)?;
        let outcome = PushOutcome {
            version: parse_version(&body.version)?,
            previous_version: body
                .previous_version
                .as_deref()
                .map(parse_version)
                .transpose()?,
            change_type: body.change_type,
            change_reason: body.change_reason,
        };
        info!(version = %outcome.version, "pushed environment");
        Ok(outcome)
    }

    #[instrument(skip_all, fields(id = %id))]
    fn delete_environment_remote(&self, id: &ResourceId) -> SyncResult<()> {
        let path = format!("/v1/environment/{}/{}", id.namespace(), id.name());
        let builder = self.authorized(self.http.delete(self.api(&path)))?;
        send(builder, ResourceKind::Environment, id)?;
        info!("deleted remote environment");
        Ok(())
    }

    #[instrument(skip_all)]
    fn list_environments_remote(&self) -> SyncResult<Vec<RemoteSummary>> {
        let builder = self.authorized(self.http.get(self.api("/v1/environments")))?;
        let response = send(builder, ResourceKind::Environment, "listing")?;
        let body: EnvironmentListBody = decode(response)?;
        Ok(summaries(body.environments))
    }

    #[instrument(skip_all, fields(id = %id))]
    fn fetch_component(
        &self,
        id: &ResourceId,
        version: Option<&Version>,
    ) -> SyncResult<ComponentRecord> {
        let token = self.pull_token(id)?;
        let version = match version {
            Some(version) => version.clone(),
            None => self.latest_tag(id, &token)?,
        };

        let builder = self
            .http
            .get(self.oci(id, &format!("manifests/{version}")))
            .header(AUTHORIZATION, format!("Bearer {token}"))
            .header(ACCEPT, OCI_MANIFEST_MEDIA_TYPE);
        let response = send(builder, ResourceKind::Component, format!("{id}@{version}"))?;
        let manifest: OciManifest = decode(response)?;

        let wit_layers = manifest
            .layers
            .iter()
            .filter(|layer| layer.media_type == WIT_MEDIA_TYPE)
            .count();
        let implementation_layers = manifest.layers.len() - wit_layers;
        if wit_layers > 1 || implementation_layers > 1 {
            return Err(SyncError::InvalidResponse(format!(
                "manifest of {id}@{version} has {wit_layers} WIT package and {implementation_layers} implementation layers; expected at most one of each"
            )));
        }

        let mut package = None;
        let mut module = None;
        for layer in &manifest.layers {
            let blob = self.download_blob(id, &layer.digest, &token)?;
            if layer.media_type == WIT_MEDIA_TYPE {
                package = Some(blob);
            } else {
                module = Some(blob);
            }
        }
        let package = package.ok_or_else(|| {
            SyncError::InvalidResponse(format!("manifest of {id}@{version} has no WIT package layer"))
        })?;
        debug!(%version, layers = manifest.layers.len(), "fetched component");
        Ok(ComponentRecord {
            id: id.clone(),
            version,
            package,
            module,
        })
    }

    #[instrument(skip_all, fields(id = %record.reference()))]
    fn push_component(&self, record: &ComponentRecord) -> SyncResult<()> {
        let mut form = multipart::Form::new().part(
            "package.wasm",
            wasm_part(&record.package, "package.wasm")?,
        );
        if let Some(module) = &record.module {
            form = form.part("component.wasm", wasm_part(module, "component.wasm")?);
        }
        let builder = self.authorized(self.http.put(self.api("/v1/component")).multipart(form))?;
        send(builder, ResourceKind::Component, record.reference())?;
        info!("pushed component");
        Ok(())
    }

    #[instrument(skip_all)]
    fn list_components_remote(&self) -> SyncResult<Vec<RemoteSummary>> {
        let builder = self.authorized(self.http.get(self.api("/v1/components")))?;
        let response = send(builder, ResourceKind::Component, "listing")?;
        let body: ComponentListBody = decode(response)?;
        Ok(summaries(body.components))
    }
}

fn wasm_part(bytes: &Bytes, file_name: &'static str) -> SyncResult<multipart::Part> {
    multipart::Part::bytes(bytes.to_vec())
        .file_name(file_name)
        .mime_str("application/wasm")
        .map_err(|err| SyncError::Internal(format!("invalid multipart part: {err}")))
}

/// Sends the request and maps non-success statuses onto [`SyncError`].
fn send(
    builder: RequestBuilder,
    kind: ResourceKind,
    id: impl std::fmt::Display,
) -> SyncResult<Response> {
    let response = builder
        .send()
        .map_err(|err| SyncError::Network(err.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(status_error(status, &body, kind, id))
}

pub(crate) fn status_error(
    status: StatusCode,
    body: &str,
    kind: ResourceKind,
    id: impl std::fmt::Display,
) -> SyncError {
    let detail = if body.trim().is_empty() {
        status.to_string()
    } else {
        format!("{status}: {}", body.trim())
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Unauthorized(detail),
        StatusCode::NOT_FOUND => SyncError::not_found(kind, id, Source::Remote),
        StatusCode::CONFLICT => SyncError::Conflict(format!(
            "{kind} `{id}` changed in the registry since it was last pulled ({detail})"
        )),
        status if status.is_server_error() => SyncError::Network(detail),
        _ => SyncError::InvalidResponse(format!("unexpected status {detail}")),
    }
}

fn decode<T: serde::de::DeserializeOwned>(response: Response) -> SyncResult<T> {
    let bytes = response
        .bytes()
        .map_err(|err| SyncError::Network(format!("failed to read response: {err}")))?;
    serde_json::from_slice(&bytes).map_err(|err| SyncError::InvalidResponse(err.to_string()))
}

fn parse_version(raw: &str) -> SyncResult<Version> {
    Version::parse(raw)
        .map_err(|err| SyncError::InvalidResponse(format!("invalid version `{raw}`: {err}")))
}

fn summaries(entries: Vec<SummaryBody>) -> Vec<RemoteSummary> {
    entries
        .into_iter()
        .filter_map(|entry| {
            let id = ResourceId::new(entry.namespace, entry.name);
            let version = Version::parse(&entry.latest_version);
            match (id, version) {
                (Ok(id), Ok(latest_version)) => Some(RemoteSummary { id, latest_version }),
                (id, version) => {
                    warn!(?id, ?version, "skipping malformed registry entry");
                    None
                }
            }
        })
        .collect()
}

/// Highest semver tag; non-semver tags are ignored.
pub(crate) fn highest_version(tags: &[String]) -> Option<Version> {
    tags.iter()
        .filter_map(|tag| Version::parse(tag).ok())
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_error_taxonomy() {
        let kind = ResourceKind::Environment;
        assert!(matches!(
            status_error(StatusCode::FORBIDDEN, "", kind, "a:b"),
            SyncError::Unauthorized(_)
        ));
        assert!(status_error(StatusCode::NOT_FOUND, "", kind, "a:b").is_not_found());
        assert!(matches!(
            status_error(StatusCode::CONFLICT, "stale", kind, "a:b"),
            SyncError::Conflict(_)
        ));
        assert!(status_error(StatusCode::BAD_GATEWAY, "", kind, "a:b").is_retryable());
        assert!(matches!(
            status_error(StatusCode::IM_A_TEAPOT, "", kind, "a:b"),
            SyncError::InvalidResponse(_)
        ));
    }

    #[test]
    fn highest_version_ignores_non_semver_tags() {
        let tags = vec![
            "latest".to_string(),
            "0.9.0".to_string(),
            "0.10.0".to_string(),
            "sha256-abc".to_string(),
        ];
        assert_eq!(highest_version(&tags), Some(Version::new(0, 10, 0)));
        assert_eq!(highest_version(&["latest".to_string()]), None);
    }

    #[test]
    fn calls_without_api_key_are_unauthorized() {
        // port 9 (discard) is never contacted: the key check comes first
        let endpoints = RegistryEndpoints::new("http://127.0.0.1:9", "http://127.0.0.1:9");
        let client = HttpRegistryClient::new(endpoints, None).unwrap();
        let id: ResourceId = "team:prod".parse().unwrap();
        assert!(matches!(
            client.fetch_environment(&id, None),
            Err(SyncError::Unauthorized(_))
        ));
        assert!(matches!(
            client.validate_credential(),
            Err(SyncError::Unauthorized(_))
        ));
    }

    #[test]
    fn endpoints_trim_trailing_slashes() {
        let endpoints = RegistryEndpoints::new("http://api.test/", "http://oci.test//");
        assert_eq!(endpoints.api_url, "http://api.test");
        assert_eq!(endpoints.registry_url, "http://oci.test");
        assert_eq!(RegistryEndpoints::staging().api_url, STAGING_API_URL);
    }
}
