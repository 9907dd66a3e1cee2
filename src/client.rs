use std::collections::HashMap;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::asset::Asset;
use crate::config::Env;
use crate::error::{RemoteError, Result};
use crate::filter::Filter;
use crate::transport::{Params, Transport};

/// Version of the admin REST API requests are issued against.
pub const API_PATH: &str = "/admin/api/unstable";

/// A remote theme.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Theme {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub previewable: bool,
    #[serde(default)]
    pub processing: bool,
}

/// Shop identity for the domain being worked on.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Shop {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
}

/// Error envelopes come back as a bare sentence, a list, or a field map.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum ApiErrors {
    Message(String),
    List(Vec<String>),
    Fields(HashMap<String, Vec<String>>),
}

impl ApiErrors {
    fn is_empty(&self) -> bool {
        match self {
            ApiErrors::Message(m) => m.is_empty(),
            ApiErrors::List(l) => l.is_empty(),
            ApiErrors::Fields(f) => f.is_empty(),
        }
    }

    fn field(&self, name: &str) -> Option<&[String]> {
        match self {
            ApiErrors::Fields(fields) => fields.get(name).map(Vec::as_slice),
            _ => None,
        }
    }

    fn to_sentence(&self) -> String {
        match self {
            ApiErrors::Message(m) => m.clone(),
            ApiErrors::List(l) => join_sentence(l.clone()),
            ApiErrors::Fields(fields) => {
                let mut messages: Vec<String> = fields
                    .iter()
                    .flat_map(|(attr, errs)| errs.iter().map(move |e| format!("{} {}", attr, e)))
                    .collect();
                messages.sort();
                join_sentence(messages)
            }
        }
    }
}

fn join_sentence(parts: Vec<String>) -> String {
    match parts.len() {
        0 => String::new(),
        1 => parts[0].clone(),
        2 => format!("{} and {}", parts[0], parts[1]),
        n => format!("{}, and {}", parts[..n - 1].join(", "), parts[n - 1]),
    }
}

#[derive(Debug, Deserialize)]
struct ThemeEnvelope {
    #[serde(default)]
    theme: Option<Theme>,
    #[serde(default)]
    errors: Option<ApiErrors>,
}

#[derive(Debug, Deserialize)]
struct ThemesEnvelope {
    #[serde(default)]
    themes: Vec<Theme>,
}

#[derive(Debug, Deserialize)]
struct ShopEnvelope {
    #[serde(default)]
    shop: Option<Shop>,
}

#[derive(Debug, Deserialize)]
struct AssetEnvelope {
    #[serde(default)]
    asset: Option<Asset>,
    #[serde(default)]
    errors: Option<ApiErrors>,
}

#[derive(Debug, Deserialize)]
struct AssetsEnvelope {
    #[serde(default)]
    assets: Vec<Asset>,
}

/// The interactor with the remote theme API. All remote operations for one
/// environment go through a client.
pub struct Client {
    theme_id: String,
    filter: Filter,
    http: Transport,
}

impl Client {
    pub fn new(env: &Env) -> Result<Client> {
        Client::with_params(env, Params::from_env(env))
    }

    /// Test hook for pointing the transport somewhere else.
    pub fn with_params(env: &Env, params: Params) -> Result<Client> {
        let filter = Filter::new(&env.directory, &env.ignored_files, &env.ignores)?;
        Ok(Client {
            theme_id: env.theme_id.clone(),
            filter,
            http: Transport::new(params)?,
        })
    }

    pub fn theme_id(&self) -> &str {
        &self.theme_id
    }

    /// Identity of the shop being worked on. Used as the credential check.
    pub async fn get_shop(&self) -> Result<Shop> {
        let resp = self.http.get("/meta.json").await?;
        if resp.status() == 404 {
            return Err(RemoteError::ShopDomainNotFound.into());
        }
        let envelope: ShopEnvelope = unmarshal(resp).await?;
        Ok(envelope.shop.unwrap_or_default())
    }

    /// All themes available on the domain.
    pub async fn themes(&self) -> Result<Vec<Theme>> {
        let resp = self.http.get(&format!("{}/themes.json", API_PATH)).await?;
        let envelope: ThemesEnvelope = unmarshal(resp).await?;
        Ok(envelope.themes)
    }

    /// Create an unpublished theme and point this client at it.
    pub async fn create_new_theme(&mut self, name: &str) -> Result<Theme> {
        if name.is_empty() {
            return Err(RemoteError::ThemeNameRequired.into());
        }

        let resp = self
            .http
            .post(
                &format!("{}/themes.json", API_PATH),
                &json!({"theme": {"name": name}}),
            )
            .await?;
        let envelope: ThemeEnvelope = unmarshal(resp).await?;

        if let Some(errors) = envelope.errors.filter(|e| !e.is_empty()) {
            return Err(RemoteError::Api(errors.to_sentence()).into());
        }

        let theme = envelope.theme.unwrap_or_default();
        self.theme_id = theme.id.to_string();
        Ok(theme)
    }

    /// The theme this client is configured against.
    pub async fn get_info(&self) -> Result<Theme> {
        if self.theme_id.is_empty() {
            return Err(RemoteError::InfoWithoutThemeId.into());
        }

        let resp = self
            .http
            .get(&format!("{}/themes/{}.json", API_PATH, self.theme_id))
            .await?;
        if resp.status() == 404 {
            return Err(RemoteError::ThemeNotFound.into());
        }
        let envelope: ThemeEnvelope = unmarshal(resp).await?;
        Ok(envelope.theme.unwrap_or_default())
    }

    /// Promote the configured theme to the shop's published theme.
    pub async fn publish_theme(&self) -> Result<()> {
        if self.theme_id.is_empty() {
            return Err(RemoteError::PublishWithoutThemeId.into());
        }

        let resp = self
            .http
            .put(
                &format!("{}/themes/{}.json", API_PATH, self.theme_id),
                &json!({"theme": {"role": "main"}}),
                &[],
            )
            .await?;
        if resp.status() == 404 {
            return Err(RemoteError::ThemeNotFound.into());
        }
        let envelope: ThemeEnvelope = unmarshal(resp).await?;
        if let Some(errors) = envelope.errors.filter(|e| !e.is_empty()) {
            return Err(RemoteError::Api(errors.to_sentence()).into());
        }
        Ok(())
    }

    /// List remote assets with their checksums. Ignored files are filtered
    /// out, and when the server lists both `x.ext` and `x.ext.liquid` only
    /// the liquid source is kept since the other is its compiled output.
    pub async fn get_all_assets(&self) -> Result<Vec<Asset>> {
        let resp = self
            .http
            .get(&self.asset_path(&[("fields", "key,checksum")]))
            .await?;
        if resp.status() == 404 {
            return Err(RemoteError::ThemeNotFound.into());
        }
        let envelope: AssetsEnvelope = unmarshal(resp).await?;

        let mut assets = envelope.assets;
        assets.sort_by(|a, b| a.key.cmp(&b.key));

        let compiled: Vec<bool> = assets
            .iter()
            .enumerate()
            .map(|(i, asset)| {
                i + 1 < assets.len() && assets[i + 1].key == format!("{}.liquid", asset.key)
            })
            .collect();

        Ok(assets
            .into_iter()
            .zip(compiled)
            .filter(|(asset, is_compiled)| !is_compiled && !self.filter.matches(&asset.key))
            .map(|(asset, _)| asset)
            .collect())
    }

    /// Fetch a single remote asset with its payload.
    pub async fn get_asset(&self, key: &str) -> Result<Asset> {
        let resp = self.http.get(&self.asset_path(&[("asset[key]", key)])).await?;
        if resp.status() == 404 {
            return Err(RemoteError::NotPartOfTheme.into());
        }
        let envelope: AssetEnvelope = unmarshal(resp).await?;
        Ok(envelope.asset.unwrap_or_default())
    }

    /// Upload an asset. When a last-known checksum is given the server only
    /// applies the write if its copy still matches, otherwise it answers
    /// with a precondition failure that is surfaced to the caller.
    pub async fn update_asset(&self, asset: &Asset, last_known_checksum: &str) -> Result<Asset> {
        self.update_asset_inner(asset, last_known_checksum, false)
            .await
    }

    fn update_asset_inner<'a>(
        &'a self,
        asset: &'a Asset,
        last_known_checksum: &'a str,
        retried: bool,
    ) -> futures::future::BoxFuture<'a, Result<Asset>> {
        Box::pin(async move {
            let mut headers: Vec<(&str, &str)> = Vec::new();
            if !last_known_checksum.is_empty() {
                headers.push(("X-Shopify-Replace-If-Checksum-Match", last_known_checksum));
            }

            let resp = self
                .http
                .put(&self.asset_path(&[]), &json!({"asset": asset}), &headers)
                .await?;
            let status = resp.status().as_u16();
            if status == 404 {
                return Err(RemoteError::NotPartOfTheme.into());
            }

            let envelope: AssetEnvelope = unmarshal(resp).await?;
            if let Some(errors) = envelope.errors.filter(|e| !e.is_empty()) {
                if let Some(messages) = errors.field("asset") {
                    let generated = status == 422
                        && messages
                            .first()
                            .is_some_and(|m| m.contains("Cannot overwrite generated asset"));
                    if generated && !retried {
                        // the compiled sibling shadows this asset; drop it
                        // and try the upload once more
                        debug!("removing generated sibling of {}", asset.key);
                        let sibling = Asset {
                            key: format!("{}.liquid", asset.key),
                            ..Asset::default()
                        };
                        let _ = self.delete_asset(&sibling).await;
                        return self.update_asset_inner(asset, last_known_checksum, true).await;
                    }
                    return Err(RemoteError::Api(join_sentence(messages.to_vec())).into());
                }
                return Err(RemoteError::Api(errors.to_sentence()).into());
            }

            if status >= 400 {
                return Err(RemoteError::UnexpectedResponse {
                    status,
                    body: String::new(),
                }
                .into());
            }

            Ok(envelope.asset.unwrap_or_default())
        })
    }

    /// Delete a remote asset.
    pub async fn delete_asset(&self, asset: &Asset) -> Result<()> {
        let resp = self
            .http
            .delete(&self.asset_path(&[("asset[key]", &asset.key)]))
            .await?;
        match resp.status().as_u16() {
            403 => return Err(RemoteError::CriticalFile.into()),
            404 => return Err(RemoteError::NotPartOfTheme.into()),
            406 => return Err(RemoteError::MissingAssetName.into()),
            _ => {}
        }

        let envelope: AssetEnvelope = unmarshal(resp).await?;
        if let Some(errors) = envelope.errors.filter(|e| !e.is_empty()) {
            return Err(RemoteError::Api(errors.to_sentence()).into());
        }
        Ok(())
    }

    fn asset_path(&self, query: &[(&str, &str)]) -> String {
        let mut path = format!("{}/themes/{}/assets.json", API_PATH, self.theme_id);
        if self.theme_id.is_empty() {
            path = format!("{}/assets.json", API_PATH);
        }

        if !query.is_empty() {
            let encoded: Vec<String> = query
                .iter()
                .map(|(k, v)| format!("{}={}", urlencode(k), urlencode(v)))
                .collect();
            path = format!("{}?{}", path, encoded.join("&"));
        }

        path
    }
}

fn urlencode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Decode a JSON response body, falling back to a readable error when the
/// body is not the expected shape.
async fn unmarshal<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status().as_u16();
    let body = resp
        .text()
        .await
        .map_err(crate::error::TransportError::from)?;

    serde_json::from_str(&body).map_err(|_| {
        if let Ok(errors) = serde_json::from_str::<HashMap<String, ApiErrors>>(&body) {
            if let Some(errors) = errors.get("errors") {
                return RemoteError::Api(errors.to_sentence()).into();
            }
        }
        RemoteError::UnexpectedResponse {
            status,
            body: body.chars().take(200).collect(),
        }
        .into()
    })
}
