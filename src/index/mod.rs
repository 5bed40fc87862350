//! The concurrent B+tree index: page layout, key comparison, the tree
//! itself, and forward iteration.

pub mod btree;
pub mod comparator;
pub mod iterator;
pub mod node;

/// A fixed-width key. Concrete rather than generic over width: see
/// `DESIGN.md` for why (a `const N: usize`-generic byte-blob key would need
/// `generic_const_exprs` to size the node's entry array, which isn't stable).
/// Callers that need a different key shape plug it through [`comparator::KeyComparator`]
/// rather than through this type.
pub type Key = u64;

pub use node::Rid;
