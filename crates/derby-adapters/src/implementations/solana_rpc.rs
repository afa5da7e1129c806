//! Solana JSON-RPC client for keypair ledger chains.
//!
//! Serves both Solana clusters and SOON rollups, which expose the same RPC
//! surface. Transfers are legacy transactions carrying a single System
//! Program transfer from the wallet to itself, signed with ed25519.

use super::keypair_ledger::KeypairLedgerClient;
use crate::AdapterError;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use derby_types::{Commitment, SecretString};
use ed25519_dalek::{Signer, SigningKey};
use rand::rngs::OsRng;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const SYSTEM_PROGRAM_ID: [u8; 32] = [0; 32];
const SYSTEM_TRANSFER_INSTRUCTION: u32 = 2;
const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_millis(400);

#[derive(Deserialize)]
struct RpcResponse<T> {
	result: Option<T>,
	error: Option<RpcError>,
}

#[derive(Deserialize)]
struct RpcError {
	message: String,
}

#[derive(Deserialize)]
struct WithContext<T> {
	value: T,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LatestBlockhash {
	blockhash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignatureStatus {
	confirmation_status: Option<String>,
	err: Option<Value>,
}

/// Keypair ledger client signing with one ed25519 keypair.
pub struct SolanaRpcClient {
	signing_key: SigningKey,
	http: reqwest::Client,
}

impl SolanaRpcClient {
	pub fn new(signing_key: SigningKey) -> Self {
		Self {
			signing_key,
			http: reqwest::Client::new(),
		}
	}

	/// Loads a 64-byte keypair, either as the JSON byte array written by
	/// `solana-keygen` or as a base58 string.
	pub fn from_keypair(key: &SecretString) -> Result<Self, AdapterError> {
		let bytes = key
			.with_exposed(|k| {
				let k = k.trim();
				if k.starts_with('[') {
					serde_json::from_str::<Vec<u8>>(k).map_err(|e| e.to_string())
				} else {
					bs58::decode(k).into_vec().map_err(|e| e.to_string())
				}
			})
			.map_err(|e| AdapterError::Signing(format!("Invalid keypair: {}", e)))?;
		let bytes: [u8; 64] = bytes.try_into().map_err(|bytes: Vec<u8>| {
			AdapterError::Signing(format!("Invalid keypair: expected 64 bytes, got {}", bytes.len()))
		})?;
		let signing_key = SigningKey::from_keypair_bytes(&bytes)
			.map_err(|e| AdapterError::Signing(format!("Invalid keypair: {}", e)))?;
		Ok(Self::new(signing_key))
	}

	/// Client over a freshly generated keypair.
	pub fn random() -> Self {
		Self::new(SigningKey::generate(&mut OsRng))
	}

	fn pubkey(&self) -> [u8; 32] {
		self.signing_key.verifying_key().to_bytes()
	}

	async fn call<T: DeserializeOwned>(
		&self,
		endpoint: &str,
		method: &str,
		params: Value,
	) -> Result<T, AdapterError> {
		let body = json!({
			"jsonrpc": "2.0",
			"id": 1,
			"method": method,
			"params": params,
		});
		let response: RpcResponse<T> = self
			.http
			.post(endpoint)
			.json(&body)
			.send()
			.await
			.map_err(|e| network_error(endpoint, method, e))?
			.json()
			.await
			.map_err(|e| network_error(endpoint, method, e))?;

		match response {
			RpcResponse {
				error: Some(error), ..
			} => Err(AdapterError::TransactionFailed(error.message)),
			RpcResponse {
				result: Some(result),
				..
			} => Ok(result),
			_ => Err(network_error(endpoint, method, "empty response")),
		}
	}

	/// Serializes the message of a self transfer.
	fn transfer_message(&self, blockhash: &[u8; 32], lamports: u64) -> Vec<u8> {
		let mut data = SYSTEM_TRANSFER_INSTRUCTION.to_le_bytes().to_vec();
		data.extend_from_slice(&lamports.to_le_bytes());

		// One signer, no readonly signers, the system program as readonly
		let mut message = vec![1, 0, 1];
		push_short_len(&mut message, 2);
		message.extend_from_slice(&self.pubkey());
		message.extend_from_slice(&SYSTEM_PROGRAM_ID);
		message.extend_from_slice(blockhash);
		push_short_len(&mut message, 1);
		message.push(1);
		push_short_len(&mut message, 2);
		message.extend_from_slice(&[0, 0]);
		push_short_len(&mut message, data.len());
		message.extend_from_slice(&data);
		message
	}
}

/// Compact-u16 length prefix used throughout the wire format.
fn push_short_len(buf: &mut Vec<u8>, mut len: usize) {
	loop {
		let mut byte = (len & 0x7f) as u8;
		len >>= 7;
		if len == 0 {
			buf.push(byte);
			return;
		}
		byte |= 0x80;
		buf.push(byte);
	}
}

fn network_error(endpoint: &str, method: &str, e: impl std::fmt::Display) -> AdapterError {
	AdapterError::Network(format!("{} via {}: {}", method, endpoint, e))
}

/// Signature of a signed transaction, base58 encoded.
fn transaction_signature(raw: &[u8]) -> Result<String, AdapterError> {
	// Single signature behind a one byte count
	match raw.get(1..65) {
		Some(signature) if raw[0] == 1 => Ok(bs58::encode(signature).into_string()),
		_ => Err(AdapterError::TransactionFailed(
			"Malformed transaction".to_string(),
		)),
	}
}

fn commitment_rank(level: &str) -> u8 {
	match level {
		"processed" => 0,
		"confirmed" => 1,
		_ => 2,
	}
}

#[async_trait]
impl KeypairLedgerClient for SolanaRpcClient {
	fn address(&self) -> String {
		bs58::encode(self.pubkey()).into_string()
	}

	async fn get_balance(&self, endpoint: &str, commitment: Commitment) -> Result<u64, AdapterError> {
		let balance: WithContext<u64> = self
			.call(
				endpoint,
				"getBalance",
				json!([self.address(), { "commitment": commitment.as_str() }]),
			)
			.await?;
		Ok(balance.value)
	}

	async fn get_latest_blockhash(
		&self,
		endpoint: &str,
		commitment: Commitment,
	) -> Result<String, AdapterError> {
		let latest: WithContext<LatestBlockhash> = self
			.call(
				endpoint,
				"getLatestBlockhash",
				json!([{ "commitment": commitment.as_str() }]),
			)
			.await?;
		Ok(latest.value.blockhash)
	}

	fn sign_transfer(&self, blockhash: &str, lamports: u64) -> Result<Vec<u8>, AdapterError> {
		let decoded: [u8; 32] = bs58::decode(blockhash)
			.into_vec()
			.ok()
			.and_then(|bytes| bytes.try_into().ok())
			.ok_or_else(|| AdapterError::Signing(format!("Invalid blockhash {}", blockhash)))?;

		let message = self.transfer_message(&decoded, lamports);
		let signature = self.signing_key.sign(&message);

		let mut raw = Vec::with_capacity(1 + 64 + message.len());
		push_short_len(&mut raw, 1);
		raw.extend_from_slice(&signature.to_bytes());
		raw.extend_from_slice(&message);
		Ok(raw)
	}

	async fn send_raw_transaction(
		&self,
		endpoint: &str,
		raw: &[u8],
		commitment: Commitment,
	) -> Result<String, AdapterError> {
		self.call(
			endpoint,
			"sendTransaction",
			json!([
				BASE64.encode(raw),
				{
					"encoding": "base64",
					"skipPreflight": false,
					"preflightCommitment": commitment.as_str(),
				}
			]),
		)
		.await
	}

	async fn confirm_transaction(
		&self,
		endpoint: &str,
		signature: &str,
		commitment: Commitment,
	) -> Result<(), AdapterError> {
		let wanted = commitment_rank(commitment.as_str());
		// Bounded by the caller's operation timeout
		loop {
			let statuses: WithContext<Vec<Option<SignatureStatus>>> = self
				.call(endpoint, "getSignatureStatuses", json!([[signature]]))
				.await?;
			if let Some(Some(status)) = statuses.value.into_iter().next() {
				if let Some(err) = status.err {
					return Err(AdapterError::TransactionFailed(err.to_string()));
				}
				let reached = status
					.confirmation_status
					.as_deref()
					.map(commitment_rank)
					.unwrap_or(0);
				if reached >= wanted {
					return Ok(());
				}
			}
			tokio::time::sleep(CONFIRMATION_POLL_INTERVAL).await;
		}
	}

	async fn send_and_confirm_transfer(
		&self,
		endpoint: &str,
		lamports: u64,
		commitment: Commitment,
	) -> Result<String, AdapterError> {
		let blockhash = self.get_latest_blockhash(endpoint, commitment).await?;
		let raw = self.sign_transfer(&blockhash, lamports)?;
		let signature = transaction_signature(&raw)?;
		self.send_raw_transaction(endpoint, &raw, commitment)
			.await?;
		self.confirm_transaction(endpoint, &signature, commitment)
			.await?;
		Ok(signature)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use axum::{routing::post, Json, Router};
	use ed25519_dalek::{Signature, Verifier};
	use tokio::net::TcpListener;

	const BLOCKHASH: &str = "EkSnNWid2cvwEVnVx9aBqawnmiCNiDgp3gUdkDPTKN1N";

	/// Serves canned JSON-RPC results keyed by method name.
	async fn serve(results: Value) -> String {
		let app = Router::new().route(
			"/",
			post(move |Json(request): Json<Value>| {
				let results = results.clone();
				async move {
					let method = request["method"].as_str().unwrap_or_default();
					Json(match results.get(method) {
						Some(result) => json!({ "jsonrpc": "2.0", "id": 1, "result": result }),
						None => json!({
							"jsonrpc": "2.0",
							"id": 1,
							"error": { "code": -32002, "message": format!("{} failed", method) },
						}),
					})
				}
			}),
		);

		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			axum::serve(listener, app).await.unwrap();
		});
		format!("http://{}/", addr)
	}

	#[test]
	fn test_loads_keygen_and_base58_keypairs() {
		let key = SigningKey::generate(&mut OsRng);
		let bytes = key.to_keypair_bytes();
		let json = format!(
			"[{}]",
			bytes.iter().map(u8::to_string).collect::<Vec<_>>().join(",")
		);
		let expected = bs58::encode(key.verifying_key().to_bytes()).into_string();

		let from_json = SolanaRpcClient::from_keypair(&SecretString::new(json)).unwrap();
		let from_base58 =
			SolanaRpcClient::from_keypair(&SecretString::new(bs58::encode(bytes).into_string()))
				.unwrap();

		assert_eq!(from_json.address(), expected);
		assert_eq!(from_base58.address(), expected);
	}

	#[test]
	fn test_rejects_short_keypair() {
		let result = SolanaRpcClient::from_keypair(&SecretString::from("[1,2,3]"));
		assert!(matches!(result, Err(AdapterError::Signing(_))));
	}

	#[test]
	fn test_signed_transfer_layout() {
		let client = SolanaRpcClient::random();

		let raw = client.sign_transfer(BLOCKHASH, 3).unwrap();

		let message = &raw[65..];
		let signature = Signature::from_slice(&raw[1..65]).unwrap();
		assert_eq!(raw[0], 1);
		assert!(client
			.signing_key
			.verifying_key()
			.verify(message, &signature)
			.is_ok());
		assert_eq!(&message[..4], &[1, 0, 1, 2]);
		assert_eq!(&message[4..36], &client.pubkey());
		assert_eq!(
			bs58::encode(&message[68..100]).into_string(),
			BLOCKHASH
		);
		assert_eq!(&message[message.len() - 8..], &3u64.to_le_bytes());
		assert_ne!(raw, client.sign_transfer(BLOCKHASH, 4).unwrap());
	}

	#[test]
	fn test_rejects_invalid_blockhash() {
		let client = SolanaRpcClient::random();
		assert!(matches!(
			client.sign_transfer("not-a-hash", 1),
			Err(AdapterError::Signing(_))
		));
	}

	#[test]
	fn test_short_len_encoding() {
		let mut buf = Vec::new();
		push_short_len(&mut buf, 0x7f);
		push_short_len(&mut buf, 0x80);
		push_short_len(&mut buf, 0x3fff);
		assert_eq!(buf, vec![0x7f, 0x80, 0x01, 0xff, 0x7f]);
	}

	#[tokio::test]
	async fn test_reads_balance_and_blockhash() {
		let endpoint = serve(json!({
			"getBalance": { "context": { "slot": 1 }, "value": 5_000_000 },
			"getLatestBlockhash": {
				"context": { "slot": 1 },
				"value": { "blockhash": BLOCKHASH, "lastValidBlockHeight": 100 },
			},
		}))
		.await;
		let client = SolanaRpcClient::random();

		let balance = client.get_balance(&endpoint, Commitment::Confirmed).await;
		let blockhash = client
			.get_latest_blockhash(&endpoint, Commitment::Confirmed)
			.await;

		assert_eq!(balance, Ok(5_000_000));
		assert_eq!(blockhash.as_deref(), Ok(BLOCKHASH));
	}

	#[tokio::test]
	async fn test_fresh_transfer_waits_for_commitment() {
		let endpoint = serve(json!({
			"getLatestBlockhash": {
				"context": { "slot": 1 },
				"value": { "blockhash": BLOCKHASH, "lastValidBlockHeight": 100 },
			},
			"sendTransaction": "ignored",
			"getSignatureStatuses": {
				"context": { "slot": 2 },
				"value": [{ "confirmationStatus": "confirmed", "err": null }],
			},
		}))
		.await;
		let client = SolanaRpcClient::random();

		let signature = client
			.send_and_confirm_transfer(&endpoint, 1, Commitment::Confirmed)
			.await
			.unwrap();

		assert_eq!(bs58::decode(&signature).into_vec().unwrap().len(), 64);
	}

	#[tokio::test]
	async fn test_rpc_error_message_is_kept() {
		let endpoint = serve(json!({})).await;
		let client = SolanaRpcClient::random();

		let raw = client.sign_transfer(BLOCKHASH, 1).unwrap();
		let err = client
			.send_raw_transaction(&endpoint, &raw, Commitment::Confirmed)
			.await
			.unwrap_err();

		assert_eq!(
			err,
			AdapterError::TransactionFailed("sendTransaction failed".to_string())
		);
	}
}
