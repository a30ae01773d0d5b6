//! Threat API over HTTPS using the JSON REST surface of the service.

use base64::{engine::general_purpose, Engine as _};
use serde::Deserialize;
use std::time::{Duration, SystemTime};

use super::{
    ComputeDiffRequest, ComputeDiffResponse, RawHashes, ResponseType, RiceDeltaEncoding,
    SearchHashesRequest, SearchHashesResponse, ThreatApi, ThreatEntryAdditions,
    ThreatEntryRemovals, ThreatHash,
};
use crate::config::ClientConfig;
use crate::hash::HashPrefix;
use crate::threat_type::ThreatType;
use crate::{Error, Result};

const COMPUTE_DIFF_PATH: &str = "/v1/threatLists:computeDiff";
const SEARCH_HASHES_PATH: &str = "/v1/hashes:search";

/// Blocking HTTP implementation of [`ThreatApi`].
pub struct HttpApi {
    agent: ureq::Agent,
    base: url::Url,
    api_key: String,
    user_agent: String,
}

impl HttpApi {
    /// Create a transport from the client configuration.
    ///
    /// The server URL defaults to HTTPS when it has no scheme.
    pub fn new(config: &ClientConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(Error::Config("api key is required".to_string()));
        }
        let root = if config.server_url.contains("://") {
            config.server_url.clone()
        } else {
            format!("https://{}", config.server_url)
        };
        let base = url::Url::parse(&root)
            .map_err(|e| Error::Config(format!("invalid server url {:?}: {}", root, e)))?;

        let mut builder = ureq::AgentBuilder::new().timeout(config.request_timeout);
        if let Some(proxy) = &config.proxy_url {
            let proxy = ureq::Proxy::new(proxy)
                .map_err(|e| Error::Config(format!("invalid proxy url {:?}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self {
            agent: builder.build(),
            base,
            api_key: config.api_key.clone(),
            user_agent: format!("{}/{}", config.client_id, config.client_version),
        })
    }

    fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<T> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| Error::Config(format!("invalid request path {}: {}", path, e)))?;
        {
            let mut query = url.query_pairs_mut();
            for (k, v) in params {
                query.append_pair(k, v);
            }
            query.append_pair("key", &self.api_key);
        }

        log::trace!("GET {}{}", self.base, path);
        let response = self
            .agent
            .get(url.as_str())
            .timeout(timeout)
            .set("User-Agent", &self.user_agent)
            .call()
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => {
                    Error::Http(format!("unexpected server response code: {}", code))
                }
                ureq::Error::Transport(t) => Error::Http(format!("transport error: {}", t)),
            })?;

        Ok(serde_json::from_reader(response.into_reader())?)
    }
}

impl ThreatApi for HttpApi {
    fn compute_diff(
        &self,
        req: &ComputeDiffRequest,
        timeout: Duration,
    ) -> Result<ComputeDiffResponse> {
        let mut params = vec![("threatType", req.threat_type.as_str().to_string())];
        if !req.version_token.is_empty() {
            params.push(("versionToken", general_purpose::STANDARD.encode(&req.version_token)));
        }
        for name in req.supported_compressions.names() {
            params.push(("constraints.supportedCompressions", name.to_string()));
        }
        let body: wire::ComputeDiffResponse = self.get(COMPUTE_DIFF_PATH, &params, timeout)?;
        body.try_into()
    }

    fn search_hashes(
        &self,
        req: &SearchHashesRequest,
        timeout: Duration,
    ) -> Result<SearchHashesResponse> {
        let mut params = vec![(
            "hashPrefix",
            general_purpose::STANDARD.encode(req.hash_prefix.as_bytes()),
        )];
        for t in &req.threat_types {
            params.push(("threatTypes", t.as_str().to_string()));
        }
        let body: wire::SearchHashesResponse = self.get(SEARCH_HASHES_PATH, &params, timeout)?;
        body.try_into()
    }
}

fn decode_bytes(field: &str, s: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(s)
        .map_err(|e| Error::MalformedResponse(format!("{} is not base64: {}", field, e)))
}

fn parse_time(field: &str, s: &str) -> Result<SystemTime> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(SystemTime::from)
        .map_err(|e| Error::MalformedResponse(format!("{} is not RFC 3339: {}", field, e)))
}

/// Lists the server named that this client knows about. Unknown names are skipped.
fn known_threat_types(names: &[String]) -> Vec<ThreatType> {
    names.iter().filter_map(|n| n.parse().ok()).collect()
}

/// JSON shapes of the REST responses.
mod wire {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(untagged)]
    pub enum Int64 {
        Number(u64),
        Text(String),
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct RiceDeltaEncoding {
        pub first_value: Option<Int64>,
        pub rice_parameter: u32,
        pub entry_count: u32,
        pub encoded_data: String,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct RawHashes {
        pub prefix_size: u32,
        pub raw_hashes: String,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Additions {
        pub raw_hashes: Vec<RawHashes>,
        pub rice_hashes: Option<RiceDeltaEncoding>,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    pub struct RawIndices {
        pub indices: Vec<u32>,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct Removals {
        pub raw_indices: Option<RawIndices>,
        pub rice_indices: Option<RiceDeltaEncoding>,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    pub struct Checksum {
        pub sha256: String,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct ComputeDiffResponse {
        pub response_type: String,
        pub additions: Option<Additions>,
        pub removals: Option<Removals>,
        pub new_version_token: String,
        pub checksum: Option<Checksum>,
        pub recommended_next_diff: Option<String>,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct ThreatHash {
        pub threat_types: Vec<String>,
        pub hash: String,
        pub expire_time: String,
    }

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    pub struct SearchHashesResponse {
        pub threats: Vec<ThreatHash>,
        pub negative_expire_time: Option<String>,
    }
}

impl TryFrom<wire::RiceDeltaEncoding> for RiceDeltaEncoding {
    type Error = Error;

    fn try_from(w: wire::RiceDeltaEncoding) -> Result<Self> {
        let first_value = match w.first_value {
            None => 0,
            Some(wire::Int64::Number(n)) => n,
            Some(wire::Int64::Text(s)) => s
                .parse()
                .map_err(|_| Error::MalformedResponse(format!("bad firstValue {:?}", s)))?,
        };
        Ok(Self {
            first_value,
            rice_parameter: w.rice_parameter,
            entry_count: w.entry_count,
            encoded_data: decode_bytes("encodedData", &w.encoded_data)?,
        })
    }
}

impl TryFrom<wire::ComputeDiffResponse> for ComputeDiffResponse {
    type Error = Error;

    fn try_from(w: wire::ComputeDiffResponse) -> Result<Self> {
        let response_type = match w.response_type.as_str() {
            "DIFF" => ResponseType::Diff,
            "RESET" => ResponseType::Reset,
            _ => ResponseType::Unspecified,
        };

        let additions = match w.additions {
            Some(a) => Some(ThreatEntryAdditions {
                raw_hashes: a
                    .raw_hashes
                    .into_iter()
                    .map(|r| {
                        Ok(RawHashes {
                            prefix_size: r.prefix_size,
                            raw_hashes: decode_bytes("rawHashes", &r.raw_hashes)?,
                        })
                    })
                    .collect::<Result<_>>()?,
                rice_hashes: a.rice_hashes.map(TryInto::try_into).transpose()?,
            }),
            None => None,
        };

        let removals = match w.removals {
            Some(r) => Some(ThreatEntryRemovals {
                raw_indices: r.raw_indices.map(|i| i.indices),
                rice_indices: r.rice_indices.map(TryInto::try_into).transpose()?,
            }),
            None => None,
        };

        Ok(Self {
            response_type,
            additions,
            removals,
            new_version_token: decode_bytes("newVersionToken", &w.new_version_token)?,
            checksum: w
                .checksum
                .map(|c| decode_bytes("checksum", &c.sha256))
                .transpose()?,
            recommended_next_diff: w
                .recommended_next_diff
                .map(|t| parse_time("recommendedNextDiff", &t))
                .transpose()?,
        })
    }
}

impl TryFrom<wire::SearchHashesResponse> for SearchHashesResponse {
    type Error = Error;

    fn try_from(w: wire::SearchHashesResponse) -> Result<Self> {
        let threats = w
            .threats
            .into_iter()
            .map(|t| {
                Ok(ThreatHash {
                    threat_types: known_threat_types(&t.threat_types),
                    hash: HashPrefix::new(decode_bytes("hash", &t.hash)?),
                    expire_time: parse_time("expireTime", &t.expire_time)?,
                })
            })
            .collect::<Result<_>>()?;
        Ok(Self {
            threats,
            negative_expire_time: w
                .negative_expire_time
                .map(|t| parse_time("negativeExpireTime", &t))
                .transpose()?,
        })
    }
}
