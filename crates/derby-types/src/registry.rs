//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Each pluggable implementation (a chain family adapter, a race recorder)
/// provides a Registry struct declaring the name it is referenced by and the
/// factory that builds it.
pub trait ImplementationRegistry {
	/// Name used in configuration or classification to reference this
	/// implementation, for example `evm` or `memory`.
	const NAME: &'static str;

	/// The factory function type this implementation provides.
	type Factory;

	/// Returns the factory function for this implementation.
	fn factory() -> Self::Factory;
}
