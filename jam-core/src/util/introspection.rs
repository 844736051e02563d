use std::fmt::Debug;

/// Implementors return a plain snapshot of their internal counters and state.
/// Used by tests and the demo binary to observe fakes without reaching into them.
pub trait Introspect<T>
where
    T: Debug,
{
    fn introspect(&self) -> T;
}
