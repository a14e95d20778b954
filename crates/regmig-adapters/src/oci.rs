//! OCI distribution image copier
//!
//! Copies every tag of a repository from one registry to another over the
//! OCI distribution API:
//! - manifests are fetched with every supported media type accepted
//! - index manifests are followed to their child manifests
//! - blobs already present at the destination are skipped (HEAD)
//! - missing blobs are streamed from the source GET into a monolithic
//!   upload (POST, then PUT with digest)
//!
//! Each side picks its own scheme and TLS verification from its `insecure` flag.
//!
//! Registries asking for credentials get Basic auth or a Bearer token from
//! the challenge realm, using the keychain entry for their host.

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use regmig_core::{
    effective_concurrency, Credentials, ImageCopier, ImageCopyRequest, Keychain, MigrateError,
    Result, RunContext,
};
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION, WWW_AUTHENTICATE};
use reqwest::{Body, Client, ClientBuilder, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.index.v1+json, \
    application/vnd.oci.image.manifest.v1+json, \
    application/vnd.docker.distribution.manifest.list.v2+json, \
    application/vnd.docker.distribution.manifest.v2+json";

const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

static CHALLENGE_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("valid regex"));

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Descriptor {
    digest: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestDoc {
    #[serde(default)]
    media_type: Option<String>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Authorization {
    Anonymous,
    Basic,
    Bearer(String),
}

/// Parsed `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
enum Challenge {
    Basic,
    Bearer {
        realm: String,
        service: Option<String>,
        scope: Option<String>,
    },
}

fn parse_challenge(header: &str) -> Option<Challenge> {
    let (scheme, params) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
    if scheme.eq_ignore_ascii_case("basic") {
        return Some(Challenge::Basic);
    }
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let params: HashMap<String, String> = CHALLENGE_PARAM
        .captures_iter(params)
        .map(|c| (c[1].to_ascii_lowercase(), c[2].to_string()))
        .collect();
    Some(Challenge::Bearer {
        realm: params.get("realm")?.clone(),
        service: params.get("service").cloned(),
        scope: params.get("scope").cloned(),
    })
}

/// Split `host[:port]/path` into base URL, host and repository name
fn parse_reference(reference: &str, insecure: bool) -> Result<(String, String, String)> {
    let trimmed = reference
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_matches('/');
    match trimmed.split_once('/') {
        Some((host, name)) if !host.is_empty() && !name.is_empty() => {
            let scheme = if insecure { "http" } else { "https" };
            Ok((format!("{}://{}", scheme, host), host.to_string(), name.to_string()))
        }
        _ => Err(MigrateError::InvalidConfig(format!(
            "image reference {} must be host/repository",
            reference
        ))),
    }
}

/// Append the digest parameter to an upload location, resolving relative locations
fn upload_url(base_url: &str, location: &str, digest: &str) -> Result<String> {
    let mut url = url::Url::parse(base_url)
        .and_then(|base| base.join(location))
        .map_err(|e| MigrateError::transfer(location, format!("invalid upload location: {}", e)))?;
    url.query_pairs_mut().append_pair("digest", digest);
    Ok(url.to_string())
}

fn http_error(url: &str, e: reqwest::Error) -> MigrateError {
    MigrateError::transfer(url, e.to_string())
}

async fn expect_success(response: Response, what: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(MigrateError::transfer(
        url,
        format!("{} returned {}: {}", what, status, body.trim()),
    ))
}

/// One side of a copy: a repository on a registry plus its client and auth state
struct Repository {
    client: Client,
    base_url: String,
    host: String,
    name: String,
    actions: &'static str,
    credentials: Option<Credentials>,
    auth: Mutex<Authorization>,
}

impl Repository {
    fn new(
        client: Client,
        reference: &str,
        insecure: bool,
        keychain: &Keychain,
        actions: &'static str,
    ) -> Result<Self> {
        let (base_url, host, name) = parse_reference(reference, insecure)?;
        let credentials = keychain.resolve(&host).cloned();
        Ok(Self {
            client,
            base_url,
            host,
            name,
            actions,
            credentials,
            auth: Mutex::new(Authorization::Anonymous),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v2/{}/{}", self.base_url, self.name, path)
    }

    fn authorize(&self, request: RequestBuilder, auth: &Authorization) -> RequestBuilder {
        match (auth, &self.credentials) {
            (Authorization::Bearer(token), _) => request.bearer_auth(token),
            (Authorization::Basic, Some(creds)) => request.basic_auth(
                creds.username.clone().unwrap_or_default(),
                creds.password.clone(),
            ),
            _ => request,
        }
    }

    /// Send a request, answering one authentication challenge if needed
    async fn send<F>(&self, build: F) -> Result<Response>
    where
        F: Fn(&Client) -> RequestBuilder,
    {
        let client = &self.client;
        let current = self.auth.lock().await.clone();
        let response = self
            .authorize(build(client), &current)
            .send()
            .await
            .map_err(|e| http_error(&self.base_url, e))?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let header = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        let challenge = header.as_deref().and_then(parse_challenge).ok_or_else(|| {
            MigrateError::Auth {
                endpoint: self.host.clone(),
                message: "401 without a usable WWW-Authenticate challenge".to_string(),
            }
        })?;

        let negotiated = self.negotiate(client, challenge).await?;
        *self.auth.lock().await = negotiated.clone();

        let response = self
            .authorize(build(client), &negotiated)
            .send()
            .await
            .map_err(|e| http_error(&self.base_url, e))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(MigrateError::Auth {
                endpoint: self.host.clone(),
                message: format!("credentials rejected for {}", self.name),
            });
        }
        Ok(response)
    }

    /// Send a request whose body cannot be replayed, with the authorization negotiated so far
    async fn send_once(&self, request: RequestBuilder) -> Result<Response> {
        let current = self.auth.lock().await.clone();
        self.authorize(request, &current)
            .send()
            .await
            .map_err(|e| http_error(&self.base_url, e))
    }

    async fn negotiate(&self, client: &Client, challenge: Challenge) -> Result<Authorization> {
        match challenge {
            Challenge::Basic if self.credentials.is_some() => Ok(Authorization::Basic),
            Challenge::Basic => Err(MigrateError::Auth {
                endpoint: self.host.clone(),
                message: "registry requires credentials".to_string(),
            }),
            Challenge::Bearer {
                realm,
                service,
                scope,
            } => {
                let scope =
                    scope.unwrap_or_else(|| format!("repository:{}:{}", self.name, self.actions));
                let mut query = vec![("scope", scope)];
                if let Some(service) = service {
                    query.push(("service", service));
                }

                let mut request = client.get(&realm).query(&query);
                if let Some(ref creds) = self.credentials {
                    request = request.basic_auth(
                        creds.username.clone().unwrap_or_default(),
                        creds.password.clone(),
                    );
                }
                debug!(realm = %realm, repository = %self.name, "Requesting registry token");

                let response = request.send().await.map_err(|e| http_error(&realm, e))?;
                if !response.status().is_success() {
                    return Err(MigrateError::Auth {
                        endpoint: self.host.clone(),
                        message: format!("token request returned {}", response.status()),
                    });
                }
                let token: TokenResponse = response.json().await.map_err(|e| http_error(&realm, e))?;
                token
                    .token
                    .or(token.access_token)
                    .map(Authorization::Bearer)
                    .ok_or_else(|| MigrateError::Auth {
                        endpoint: self.host.clone(),
                        message: "token response without a token".to_string(),
                    })
            }
        }
    }
}

/// Shared state of one repository copy
struct Transfer {
    source: Repository,
    destination: Repository,
}

impl Transfer {
    async fn list_tags(&self) -> Result<Vec<String>> {
        let url = self.source.url("tags/list");
        let response = self.source.send(|c| c.get(&url)).await?;
        let response = expect_success(response, "tag listing").await?;
        let list: TagList = response.json().await.map_err(|e| http_error(&url, e))?;
        Ok(list.tags.unwrap_or_default())
    }

    async fn fetch_manifest(&self, reference: &str) -> Result<(String, bytes::Bytes)> {
        let url = self.source.url(&format!("manifests/{}", reference));
        let response = self
            .source
            .send(|c| c.get(&url).header(ACCEPT, MANIFEST_ACCEPT))
            .await?;
        let response = expect_success(response, "manifest fetch").await?;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|h| h.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| http_error(&url, e))?;
        Ok((content_type.unwrap_or_default(), body))
    }

    fn copy_manifest<'a>(&'a self, ctx: &'a RunContext, reference: &'a str) -> BoxFuture<'a, Result<()>> {
        async move {
            ctx.check()?;
            let (content_type, body) = self.fetch_manifest(reference).await?;
            let manifest: ManifestDoc = serde_json::from_slice(&body)?;

            for child in &manifest.manifests {
                self.copy_manifest(ctx, &child.digest).await?;
            }
            for blob in manifest.config.iter().chain(manifest.layers.iter()) {
                self.copy_blob(ctx, &blob.digest).await?;
            }

            let media_type = if content_type.is_empty() {
                manifest.media_type.unwrap_or_else(|| OCI_MANIFEST.to_string())
            } else {
                content_type
            };
            let url = self.destination.url(&format!("manifests/{}", reference));
            let response = self
                .destination
                .send(|c| {
                    c.put(&url)
                        .header(CONTENT_TYPE, media_type.as_str())
                        .body(body.clone())
                })
                .await?;
            expect_success(response, "manifest upload").await?;
            debug!(reference, "Manifest copied");
            Ok(())
        }
        .boxed()
    }

    async fn copy_blob(&self, ctx: &RunContext, digest: &str) -> Result<()> {
        ctx.check()?;
        let path = format!("blobs/{}", digest);

        let head_url = self.destination.url(&path);
        let existing = self
            .destination
            .send(|c| c.head(&head_url))
            .await?;
        if existing.status().is_success() {
            debug!(digest, "Blob already present");
            return Ok(());
        }

        let start_url = self.destination.url("blobs/uploads/");
        let response = self.destination.send(|c| c.post(&start_url)).await?;
        let response = expect_success(response, "upload start").await?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| MigrateError::transfer(&start_url, "no Location header in upload response"))?;
        let put_url = upload_url(&self.destination.base_url, location, digest)?;

        ctx.check()?;
        let get_url = self.source.url(&path);
        let response = self.source.send(|c| c.get(&get_url)).await?;
        let blob = expect_success(response, "blob fetch").await?;
        let size = blob.content_length();

        let mut request = self
            .destination
            .client
            .put(&put_url)
            .header(CONTENT_TYPE, "application/octet-stream");
        if let Some(size) = size {
            request = request.header(CONTENT_LENGTH, size);
        }
        let response = self
            .destination
            .send_once(request.body(Body::wrap_stream(blob.bytes_stream())))
            .await?;
        expect_success(response, "blob upload").await?;
        debug!(digest, size = size.unwrap_or_default(), "Blob copied");
        Ok(())
    }
}

/// [`ImageCopier`] speaking the OCI distribution API
#[derive(Clone)]
pub struct OciImageCopier {
    client: Client,
    insecure_client: Client,
}

impl OciImageCopier {
    pub fn new() -> Result<Self> {
        Self::with_client_options(|builder| builder)
    }

    /// Build the copier, applying `configure` to both HTTP clients
    fn with_client_options(configure: fn(ClientBuilder) -> ClientBuilder) -> Result<Self> {
        let user_agent = concat!("regmig/", env!("CARGO_PKG_VERSION"));
        let client = configure(Client::builder().user_agent(user_agent))
            .build()
            .map_err(|e| MigrateError::Other(format!("Failed to create HTTP client: {}", e)))?;
        let insecure_client = configure(
            Client::builder()
                .user_agent(user_agent)
                .danger_accept_invalid_certs(true),
        )
        .build()
        .map_err(|e| MigrateError::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            insecure_client,
        })
    }

    fn client(&self, insecure: bool) -> Client {
        if insecure {
            self.insecure_client.clone()
        } else {
            self.client.clone()
        }
    }
}

#[async_trait]
impl ImageCopier for OciImageCopier {
    async fn copy_repository(&self, ctx: &RunContext, request: &ImageCopyRequest) -> Result<()> {
        let transfer = Arc::new(Transfer {
            source: Repository::new(
                self.client(request.source_insecure),
                &request.source,
                request.source_insecure,
                &request.keychain,
                "pull",
            )?,
            destination: Repository::new(
                self.client(request.destination_insecure),
                &request.destination,
                request.destination_insecure,
                &request.keychain,
                "pull,push",
            )?,
        });

        let tags = transfer.list_tags().await?;
        if tags.is_empty() {
            warn!(repository = %request.source, "Repository has no tags");
            return Ok(());
        }
        info!(repository = %request.source, tags = tags.len(), "Copying tags");

        let semaphore = Arc::new(Semaphore::new(effective_concurrency(request.jobs)));
        let mut handles = Vec::with_capacity(tags.len());
        for tag in tags {
            let transfer = Arc::clone(&transfer);
            let semaphore = Arc::clone(&semaphore);
            let ctx = ctx.clone();
            let handle = tokio::spawn({
                let tag = tag.clone();
                async move {
                    let _permit = tokio::select! {
                        _ = ctx.cancelled() => return Err(MigrateError::Cancelled),
                        permit = semaphore.acquire_owned() => permit
                            .map_err(|e| MigrateError::Other(format!("copier closed: {}", e)))?,
                    };
                    transfer.copy_manifest(&ctx, &tag).await
                }
            });
            handles.push((tag, handle));
        }

        let mut failures = Vec::new();
        for (tag, handle) in handles {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(MigrateError::Other(format!("tag copy aborted: {}", e))));
            match outcome {
                Ok(()) => debug!(tag = %tag, "Tag copied"),
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => failures.push(format!("{}: {}", tag, e)),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MigrateError::transfer(&request.source, failures.join("; ")))
        }
    }
}
