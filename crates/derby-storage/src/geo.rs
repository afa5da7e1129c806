//! Coarse geolocation of the racer.
//!
//! Looks up the public IP through ipify, then resolves it through ipinfo.
//! Any failure, including running out of the time budget, yields an empty
//! [`GeoInfo`].

use async_trait::async_trait;
use derby_types::GeoInfo;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const IPIFY_URL: &str = "https://api.ipify.org?format=json";
const IPINFO_URL: &str = "https://ipinfo.io";

/// Time budget for both lookups together.
pub const LOOKUP_BUDGET: Duration = Duration::from_secs(5);

#[async_trait]
pub trait GeoLocator: Send + Sync {
	/// Never fails; unknown fields are left empty.
	async fn locate(&self) -> GeoInfo;
}

#[derive(Deserialize)]
struct IpResponse {
	ip: String,
}

#[derive(Deserialize)]
struct IpInfoResponse {
	city: Option<String>,
	region: Option<String>,
	country: Option<String>,
}

/// Locator backed by the ipinfo.io lookup API.
pub struct IpInfoLocator {
	client: reqwest::Client,
	token: Option<String>,
	ip_url: String,
	info_url: String,
	budget: Duration,
}

impl IpInfoLocator {
	pub fn new(token: Option<String>) -> Self {
		Self {
			client: reqwest::Client::new(),
			token: token.filter(|t| !t.trim().is_empty()),
			ip_url: IPIFY_URL.to_string(),
			info_url: IPINFO_URL.to_string(),
			budget: LOOKUP_BUDGET,
		}
	}

	/// Points both lookups at other hosts.
	pub fn with_urls(mut self, ip_url: impl Into<String>, info_url: impl Into<String>) -> Self {
		self.ip_url = ip_url.into();
		self.info_url = info_url.into();
		self
	}

	fn info_url_for(&self, ip: &str) -> String {
		match &self.token {
			Some(token) => format!("{}/{}?token={}", self.info_url, ip, token),
			None => format!("{}/{}", self.info_url, ip),
		}
	}

	async fn lookup(&self) -> Result<GeoInfo, reqwest::Error> {
		let ip: IpResponse = self
			.client
			.get(&self.ip_url)
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;
		let info: IpInfoResponse = self
			.client
			.get(self.info_url_for(&ip.ip))
			.send()
			.await?
			.error_for_status()?
			.json()
			.await?;

		let non_empty = |v: Option<String>| v.filter(|s| !s.is_empty());
		Ok(GeoInfo {
			city: non_empty(info.city),
			region: non_empty(info.region),
			country: non_empty(info.country),
		})
	}
}

#[async_trait]
impl GeoLocator for IpInfoLocator {
	async fn locate(&self) -> GeoInfo {
		match tokio::time::timeout(self.budget, self.lookup()).await {
			Ok(Ok(info)) => info,
			Ok(Err(e)) => {
				debug!(error = %e, "Geolocation lookup failed");
				GeoInfo::default()
			},
			Err(_) => {
				debug!(budget_ms = self.budget.as_millis() as u64, "Geolocation lookup timed out");
				GeoInfo::default()
			},
		}
	}
}
