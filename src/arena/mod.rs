// Arena-based storage for field descriptors
//
// Each form owns one FieldArena. FieldId is a lightweight newtype indexing
// into its slab; FieldPath lookups go through the arena's path index.

pub mod field_arena;

pub(crate) use field_arena::FieldArena;
