//! Signed HTTPS client for the OCI compute, identity and virtual network APIs
//!
//! Requests are signed with the API key's RSA private key following the OCI
//! HTTP signature scheme (draft-cavage, rsa-sha256).

use super::models::{
    AvailabilityDomain, Image, Instance, LaunchInstanceDetails, NetworkSecurityGroup, Page, Shape,
    Subnet, Vnic, VnicAttachment,
};
use super::{ComputeApi, NetworkApi};
use crate::error::{ProviderError, Result};
use crate::options::Options;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use pkcs8::DecodePrivateKey;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, DATE, HOST,
};
use reqwest::Method;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::RsaPrivateKey;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use url::Url;

const API_VERSION: &str = "/20160918";
const NEXT_PAGE_HEADER: &str = "opc-next-page";
/// OCI reserves the network, gateway and broadcast addresses of every subnet.
const RESERVED_ADDRESSES_PER_CIDR: u64 = 3;

#[derive(Debug, Clone, Copy)]
enum Service {
    Compute,
    Identity,
    VirtualNetwork,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CidrUtilizationCollection {
    #[serde(default)]
    ip_inventory_cidr_utilization_summary: Vec<CidrUtilization>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CidrUtilization {
    cidr: String,
    /// Percentage of the CIDR in use
    #[serde(default)]
    utilization: f64,
    #[serde(default)]
    address_type: String,
}

/// OCI API client authenticated with an API signing key
pub struct OciClient {
    region: String,
    http: reqwest::Client,
    signer: Signer,
}

impl OciClient {
    pub fn new(options: &Options) -> Result<Self> {
        if options.region.is_empty() {
            return Err(ProviderError::Configuration("OCI region is required".to_string()));
        }
        let signer = Signer::from_options(options)?;
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            region: options.region.clone(),
            http,
            signer,
        })
    }

    async fn request<T: DeserializeOwned>(
        &self,
        service: Service,
        method: Method,
        path: &str,
        query: Vec<(&str, String)>,
        body: Option<Vec<u8>>,
    ) -> Result<(T, Option<String>)> {
        let response = self.send(service, method, path, query, body).await?;
        let next_page = response
            .headers()
            .get(NEXT_PAGE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let value = response.json::<T>().await?;
        Ok((value, next_page))
    }

    async fn send(
        &self,
        service: Service,
        method: Method,
        path: &str,
        mut query: Vec<(&str, String)>,
        mut body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response> {
        let (url, host, path_and_query) = self.build_url(service, path, &mut query)?;
        if body.is_none() && requires_body_headers(&method) {
            body = Some(Vec::new());
        }
        let headers = self
            .signer
            .signed_headers(&method, &host, &path_and_query, body.as_deref())?;

        debug!(method = %method, path = %path_and_query, "OCI request");
        let mut request = self.http.request(method, url).headers(headers);
        if let Some(bytes) = body {
            request = request.body(bytes);
        }
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let parsed: ErrorBody = serde_json::from_str(&text).unwrap_or(ErrorBody {
            code: String::new(),
            message: text,
        });
        if status == 404 {
            return Err(ProviderError::NotFound(format!(
                "{} ({})",
                path_and_query, parsed.message
            )));
        }
        Err(ProviderError::api(status, parsed.code, parsed.message))
    }

    fn build_url(
        &self,
        service: Service,
        path: &str,
        query: &mut [(&str, String)],
    ) -> Result<(Url, String, String)> {
        let base = match service {
            Service::Compute | Service::VirtualNetwork => {
                format!("https://iaas.{}.oraclecloud.com", self.region)
            }
            Service::Identity => format!("https://identity.{}.oraclecloud.com", self.region),
        };
        query.sort_by(|a, b| a.0.cmp(b.0));
        let query_string = build_query_string(query);
        let path = format!("{}{}", API_VERSION, path);
        let path_and_query = if query_string.is_empty() {
            path
        } else {
            format!("{}?{}", path, query_string)
        };
        let url = Url::parse(&format!("{}{}", base, path_and_query))
            .map_err(|e| ProviderError::Configuration(format!("invalid OCI url: {}", e)))?;
        let host = url
            .host_str()
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Configuration("missing host in OCI url".to_string()))?;
        Ok((url, host, path_and_query))
    }
}

fn paged(mut query: Vec<(&str, String)>, page: Option<String>) -> Vec<(&str, String)> {
    if let Some(page) = page {
        query.push(("page", page));
    }
    query
}

#[async_trait]
impl ComputeApi for OciClient {
    async fn list_availability_domains(
        &self,
        compartment_id: &str,
    ) -> Result<Vec<AvailabilityDomain>> {
        let query = vec![("compartmentId", compartment_id.to_string())];
        let (ads, _) = self
            .request(Service::Identity, Method::GET, "/availabilityDomains", query, None)
            .await?;
        Ok(ads)
    }

    async fn list_shapes(
        &self,
        compartment_id: &str,
        availability_domain: &str,
        page: Option<String>,
    ) -> Result<Page<Shape>> {
        let query = paged(
            vec![
                ("compartmentId", compartment_id.to_string()),
                ("availabilityDomain", availability_domain.to_string()),
            ],
            page,
        );
        let (items, next_page) = self
            .request(Service::Compute, Method::GET, "/shapes", query, None)
            .await?;
        Ok(Page { items, next_page })
    }

    async fn get_image(&self, image_id: &str) -> Result<Image> {
        let path = format!("/images/{}", image_id);
        let (image, _) = self
            .request(Service::Compute, Method::GET, &path, vec![], None)
            .await?;
        Ok(image)
    }

    async fn launch_instance(&self, details: &LaunchInstanceDetails) -> Result<Instance> {
        let body = serde_json::to_vec(details)?;
        let (instance, _) = self
            .request(Service::Compute, Method::POST, "/instances", vec![], Some(body))
            .await?;
        Ok(instance)
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let path = format!("/instances/{}", instance_id);
        self.send(Service::Compute, Method::DELETE, &path, vec![], None)
            .await?;
        Ok(())
    }

    async fn get_instance(&self, instance_id: &str) -> Result<Instance> {
        let path = format!("/instances/{}", instance_id);
        let (instance, _) = self
            .request(Service::Compute, Method::GET, &path, vec![], None)
            .await?;
        Ok(instance)
    }

    async fn list_instances(
        &self,
        compartment_id: &str,
        page: Option<String>,
    ) -> Result<Page<Instance>> {
        let query = paged(vec![("compartmentId", compartment_id.to_string())], page);
        let (items, next_page) = self
            .request(Service::Compute, Method::GET, "/instances", query, None)
            .await?;
        Ok(Page { items, next_page })
    }

    async fn list_vnic_attachments(
        &self,
        compartment_id: &str,
        instance_id: &str,
        page: Option<String>,
    ) -> Result<Page<VnicAttachment>> {
        let query = paged(
            vec![
                ("compartmentId", compartment_id.to_string()),
                ("instanceId", instance_id.to_string()),
            ],
            page,
        );
        let (items, next_page) = self
            .request(Service::Compute, Method::GET, "/vnicAttachments", query, None)
            .await?;
        Ok(Page { items, next_page })
    }
}

#[async_trait]
impl NetworkApi for OciClient {
    async fn list_subnets(&self, compartment_id: &str, page: Option<String>) -> Result<Page<Subnet>> {
        let query = paged(vec![("compartmentId", compartment_id.to_string())], page);
        let (items, next_page) = self
            .request(Service::VirtualNetwork, Method::GET, "/subnets", query, None)
            .await?;
        Ok(Page { items, next_page })
    }

    async fn list_network_security_groups(
        &self,
        compartment_id: &str,
        page: Option<String>,
    ) -> Result<Page<NetworkSecurityGroup>> {
        let query = paged(vec![("compartmentId", compartment_id.to_string())], page);
        let (items, next_page) = self
            .request(
                Service::VirtualNetwork,
                Method::GET,
                "/networkSecurityGroups",
                query,
                None,
            )
            .await?;
        Ok(Page { items, next_page })
    }

    async fn get_vnic(&self, vnic_id: &str) -> Result<Vnic> {
        let path = format!("/vnics/{}", vnic_id);
        let (vnic, _) = self
            .request(Service::VirtualNetwork, Method::GET, &path, vec![], None)
            .await?;
        Ok(vnic)
    }

    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet> {
        let path = format!("/subnets/{}", subnet_id);
        let (subnet, _) = self
            .request(Service::VirtualNetwork, Method::GET, &path, vec![], None)
            .await?;
        Ok(subnet)
    }

    async fn get_network_security_group(&self, nsg_id: &str) -> Result<NetworkSecurityGroup> {
        let path = format!("/networkSecurityGroups/{}", nsg_id);
        let (nsg, _) = self
            .request(Service::VirtualNetwork, Method::GET, &path, vec![], None)
            .await?;
        Ok(nsg)
    }

    async fn subnet_available_ips(&self, subnet_id: &str) -> Result<u64> {
        let path = format!("/ipInventory/subnets/{}/cidrs", subnet_id);
        let (collection, _): (CidrUtilizationCollection, _) = self
            .request(Service::VirtualNetwork, Method::POST, &path, vec![], None)
            .await?;
        Ok(collection
            .ip_inventory_cidr_utilization_summary
            .iter()
            .filter(|c| c.address_type.is_empty() || c.address_type.contains("IPv4"))
            .filter_map(|c| available_ipv4(&c.cidr, c.utilization))
            .sum())
    }
}

/// Free addresses in an IPv4 CIDR given its utilization percentage.
fn available_ipv4(cidr: &str, utilization: f64) -> Option<u64> {
    let prefix: u32 = cidr.split_once('/')?.1.parse().ok()?;
    if prefix > 32 {
        return None;
    }
    let usable = (1u64 << (32 - prefix)).saturating_sub(RESERVED_ADDRESSES_PER_CIDR);
    let used = (usable as f64 * utilization / 100.0).ceil() as u64;
    Some(usable.saturating_sub(used))
}

struct Signer {
    key_id: String,
    key: RsaPrivateKey,
}

impl Signer {
    fn from_options(options: &Options) -> Result<Self> {
        let key_file = options.key_file.as_ref().ok_or_else(|| {
            ProviderError::Configuration("OCI API key file is required".to_string())
        })?;
        let raw_pem = std::fs::read_to_string(key_file).map_err(|e| {
            ProviderError::Configuration(format!(
                "failed to read key file {}: {}",
                key_file.display(),
                e
            ))
        })?;
        let pem = extract_pem_block(&raw_pem).unwrap_or(raw_pem);
        let key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .ok()
            .or_else(|| RsaPrivateKey::from_pkcs1_pem(&pem).ok())
            .ok_or_else(|| {
                ProviderError::Configuration(
                    "failed to parse private key (PKCS#8 or PKCS#1)".to_string(),
                )
            })?;
        Ok(Self {
            key_id: format!("{}/{}/{}", options.tenancy, options.user, options.fingerprint),
            key,
        })
    }

    fn signed_headers(
        &self,
        method: &Method,
        host: &str,
        path_and_query: &str,
        body: Option<&[u8]>,
    ) -> Result<HeaderMap> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let request_target = format!("{} {}", method.as_str().to_lowercase(), path_and_query);

        let mut signed = vec![
            ("date", date.clone()),
            ("(request-target)", request_target),
            ("host", host.to_string()),
        ];
        let mut headers = HeaderMap::new();
        headers.insert(DATE, header_value(&date)?);
        headers.insert(HOST, header_value(host)?);

        if let Some(body) = body {
            let content_length = body.len().to_string();
            let content_type = "application/json".to_string();
            let content_hash = BASE64.encode(Sha256::digest(body));

            headers.insert(CONTENT_LENGTH, header_value(&content_length)?);
            headers.insert(CONTENT_TYPE, header_value(&content_type)?);
            headers.insert(
                HeaderName::from_static("x-content-sha256"),
                header_value(&content_hash)?,
            );
            signed.push(("content-length", content_length));
            signed.push(("content-type", content_type));
            signed.push(("x-content-sha256", content_hash));
        }

        let signature = self.sign(&build_signing_string(&signed))?;
        let names = signed.iter().map(|(n, _)| *n).collect::<Vec<_>>().join(" ");
        let authorization = format!(
            "Signature version=\"1\",keyId=\"{}\",algorithm=\"rsa-sha256\",headers=\"{}\",signature=\"{}\"",
            self.key_id, names, signature
        );
        headers.insert(AUTHORIZATION, header_value(&authorization)?);
        Ok(headers)
    }

    fn sign(&self, signing_string: &str) -> Result<String> {
        let digest = Sha256::digest(signing_string.as_bytes());
        let signature = self
            .key
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| ProviderError::Configuration(format!("failed to sign request: {}", e)))?;
        Ok(BASE64.encode(signature))
    }
}

fn header_value(raw: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(raw)
        .map_err(|e| ProviderError::Http(format!("invalid header value: {}", e)))
}

fn build_signing_string(items: &[(&str, String)]) -> String {
    items
        .iter()
        .map(|(name, value)| format!("{}: {}", name, value))
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_query_string(query: &[(&str, String)]) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (key, value) in query {
        serializer.append_pair(key, value);
    }
    serializer.finish()
}

/// Cut the PEM block out of a key file that may carry trailing text
/// (OCI console downloads append "OCI_API_KEY").
fn extract_pem_block(raw: &str) -> Option<String> {
    let start = raw.find("-----BEGIN ")?;
    let end_marker = raw[start..].find("-----END ")? + start;
    let end = raw[end_marker + 5..].find("-----")? + end_marker + 10;
    Some(raw[start..end].trim().to_string())
}

fn requires_body_headers(method: &Method) -> bool {
    matches!(method, &Method::POST | &Method::PUT | &Method::PATCH)
}
