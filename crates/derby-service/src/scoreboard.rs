//! Plain-text rendering of balances and race results.

use derby_adapters::ChainAdapter;
use derby_types::{ChainBalance, RaceResult, RaceStatus, SKIPPED_POSITION};
use std::fmt::Write;
use std::sync::Arc;

/// Finished results, genuine finishers first by position, then skipped
/// chains, then failures in their original order.
pub fn render_results(results: &[RaceResult]) -> String {
	let mut ordered: Vec<&RaceResult> = results.iter().collect();
	ordered.sort_by_key(|r| match (r.status, r.position) {
		(RaceStatus::Success, Some(position)) => position,
		_ => SKIPPED_POSITION + 1,
	});

	let mut out = String::new();
	let _ = writeln!(
		out,
		"{:<5} {:<24} {:<8} {:>8} {:>10} {:>10}",
		"Rank", "Chain", "Status", "Tx", "Avg (ms)", "Total (ms)"
	);
	for result in ordered {
		let rank = match result.position {
			Some(_) if result.skipped => "-".to_string(),
			Some(position) => position.to_string(),
			None => "-".to_string(),
		};
		let status = if result.skipped {
			"skipped".to_string()
		} else {
			result.status.to_string()
		};
		let _ = writeln!(
			out,
			"{:<5} {:<24} {:<8} {:>8} {:>10} {:>10}",
			rank,
			result.name,
			status,
			format!("{}/{}", result.tx_completed, result.tx_total),
			latency(result.average_latency),
			latency(result.total_latency),
		);
		if let (RaceStatus::Error, Some(error)) = (result.status, &result.error) {
			let _ = writeln!(out, "      {}", error);
		}
	}
	out
}

/// Funding instructions: one line per chain with its address and balance.
pub fn render_balances(adapters: &[Arc<dyn ChainAdapter>], balances: &[ChainBalance]) -> String {
	let mut out = String::new();
	for adapter in adapters {
		let descriptor = adapter.descriptor();
		let balance = balances.iter().find(|b| b.chain_id == descriptor.id);
		let state = match balance {
			Some(b) if b.has_balance => format!("funded ({})", b.balance),
			Some(b) => match &b.error {
				Some(error) => format!("unavailable: {}", error),
				None => format!("needs funds ({} <= {})", b.balance, descriptor.min_balance()),
			},
			None => "not checked".to_string(),
		};
		let address = adapter.wallet_address();
		let _ = writeln!(
			out,
			"{:<24} {:<44} {}",
			descriptor.name,
			if address.is_empty() { "-" } else { address.as_str() },
			state
		);
	}
	out
}

fn latency(value: Option<u64>) -> String {
	value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use derby_types::{
		ChainDescriptor, ChainFamily, ChainId, TransactionResult, UtxoChangeChain,
	};

	fn result(id: &str, name: &str, total: usize) -> RaceResult {
		let descriptor = ChainDescriptor {
			id: ChainId::from(id),
			name: name.to_string(),
			color: None,
			logo: None,
			testnet: true,
			layer: None,
			min_balance: None,
			family: ChainFamily::UtxoChange(UtxoChangeChain {
				rpc_url: "http://localhost:4000/v1/graphql".to_string(),
			}),
		};
		RaceResult::pending(&descriptor, total)
	}

	#[test]
	fn test_results_ordered_by_rank() {
		let mut slow = result("slow", "Slow Chain", 1);
		slow.record(&TransactionResult::success(80, "0x01"));
		slow.position = Some(2);
		let mut fast = result("fast", "Fast Chain", 1);
		fast.record(&TransactionResult::success(30, "0x02"));
		fast.position = Some(1);
		let mut broken = result("broken", "Broken Chain", 1);
		broken.record(&TransactionResult::failure(5, "Transaction nonce issue - try again"));
		let mut skipped = result("skipped", "Skipped Chain", 1);
		skipped.skip();

		let table = render_results(&[broken, slow, skipped, fast]);
		let lines: Vec<&str> = table.lines().collect();

		assert!(lines[1].starts_with("1     Fast Chain"));
		assert!(lines[1].contains("30"));
		assert!(lines[2].starts_with("2     Slow Chain"));
		assert!(lines[3].contains("Skipped Chain") && lines[3].contains("skipped"));
		assert!(lines[4].contains("Broken Chain") && lines[4].contains("error"));
		assert_eq!(lines[5].trim(), "Transaction nonce issue - try again");
	}
}
