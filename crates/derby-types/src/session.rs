//! Finished race summaries.
//!
//! This is the payload handed to the persistence collaborator once a race
//! finishes. Field names serialize in camelCase to match the race-session API.

use crate::{ChainId, RaceResult, RaceStatus};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Coarse location of the racer, all fields optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoInfo {
	pub city: Option<String>,
	pub region: Option<String>,
	pub country: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSessionResult {
	pub chain_id: ChainId,
	pub chain_name: String,
	pub tx_latencies: Vec<u64>,
	pub average_latency: u64,
	pub total_latency: u64,
	pub status: RaceStatus,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub position: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RaceSessionSummary {
	pub title: String,
	pub wallet_address: String,
	pub transaction_count: usize,
	pub status: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub city: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub region: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub country: Option<String>,
	pub results: Vec<ChainSessionResult>,
}

impl RaceSessionSummary {
	pub fn from_results(
		wallet_address: impl Into<String>,
		transaction_count: usize,
		results: &[RaceResult],
		geo: GeoInfo,
		finished_at: DateTime<Utc>,
	) -> Self {
		Self {
			title: format!(
				"Chain Derby Race - {}",
				finished_at.to_rfc3339_opts(SecondsFormat::Millis, true)
			),
			wallet_address: wallet_address.into(),
			transaction_count,
			status: "completed".to_string(),
			city: geo.city,
			region: geo.region,
			country: geo.country,
			results: results
				.iter()
				.map(|r| ChainSessionResult {
					chain_id: r.chain_id.clone(),
					chain_name: r.name.clone(),
					tx_latencies: r.tx_latencies.clone(),
					average_latency: r.average_latency.unwrap_or(0),
					total_latency: r.total_latency.unwrap_or(0),
					status: r.status,
					position: r.position,
				})
				.collect(),
		}
	}
}
