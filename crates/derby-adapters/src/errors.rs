//! Table-driven error categorization.
//!
//! Raw node and SDK errors are long and inconsistent across families. A
//! formatter maps them to stable user-facing categories by substring rules,
//! falling back to the first line of the raw message. Families extend the
//! shared base table with their own rules; family rules are checked first.

/// Substring rule mapping a raw error to a category message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRule {
	/// Matched case-insensitively against the raw message.
	pub pattern: &'static str,
	pub message: &'static str,
}

impl ErrorRule {
	pub const fn new(pattern: &'static str, message: &'static str) -> Self {
		Self { pattern, message }
	}
}

/// Rules shared by every family.
pub const BASE_RULES: &[ErrorRule] = &[
	ErrorRule::new("insufficient funds", "Insufficient funds for transaction fees"),
	ErrorRule::new("timeout", "Network timeout - chain may be congested"),
	ErrorRule::new("timed out", "Network timeout - chain may be congested"),
	ErrorRule::new("nonce", "Transaction nonce issue - try again"),
];

#[derive(Debug, Clone)]
pub struct ErrorFormatter {
	rules: Vec<ErrorRule>,
}

impl ErrorFormatter {
	/// Formatter with only the rules shared by every family.
	pub fn base() -> Self {
		Self {
			rules: BASE_RULES.to_vec(),
		}
	}

	/// Adds family rules ahead of the existing ones.
	pub fn with_rules(mut self, rules: &[ErrorRule]) -> Self {
		let mut combined = rules.to_vec();
		combined.append(&mut self.rules);
		self.rules = combined;
		self
	}

	/// Maps a raw error to the message of the first matching rule, falling
	/// back to its first non-empty line.
	pub fn format(&self, raw: &str) -> String {
		let lowered = raw.to_lowercase();
		if let Some(rule) = self
			.rules
			.iter()
			.find(|rule| lowered.contains(&rule.pattern.to_lowercase()))
		{
			return rule.message.to_string();
		}

		match raw.lines().map(str::trim).find(|line| !line.is_empty()) {
			Some(line) => line.to_string(),
			None => "Unknown error".to_string(),
		}
	}
}

impl Default for ErrorFormatter {
	fn default() -> Self {
		Self::base()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_base_categories() {
		let formatter = ErrorFormatter::base();
		assert_eq!(
			formatter.format("Network error: Insufficient funds for gas * price + value"),
			"Insufficient funds for transaction fees"
		);
		assert_eq!(
			formatter.format("Operation timed out after 30000ms"),
			"Network timeout - chain may be congested"
		);
		assert_eq!(
			formatter.format("nonce too low: next nonce 5, tx nonce 4"),
			"Transaction nonce issue - try again"
		);
	}

	#[test]
	fn test_falls_back_to_first_line() {
		let formatter = ErrorFormatter::base();
		assert_eq!(
			formatter.format("execution reverted\n  at provider.call\n  at adapter"),
			"execution reverted"
		);
		assert_eq!(formatter.format("  \n"), "Unknown error");
	}

	#[test]
	fn test_family_rules_take_precedence() {
		let formatter = ErrorFormatter::base().with_rules(&[ErrorRule::new(
			"SEQUENCE_NUMBER_TOO_OLD",
			"Transaction sequence error - please try again",
		)]);
		assert_eq!(
			formatter.format("Transaction failed: SEQUENCE_NUMBER_TOO_OLD (nonce mismatch)"),
			"Transaction sequence error - please try again"
		);
		assert_eq!(
			formatter.format("insufficient funds"),
			"Insufficient funds for transaction fees"
		);
	}
}
