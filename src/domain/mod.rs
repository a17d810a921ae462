// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs, enums and traits that define the core
// concepts of the corrector.
//
// Rules for this layer:
//   - NO zip/XML container types here
//   - NO file I/O or process spawning
//   - Only plain data and the traits other layers implement
//
// Think of this layer as the vocabulary of the system:
// units, runs, modifications, and the collaborator seams.

// Units, runs, styles and unit ids
pub mod unit;

// The append-only audit record and correction stages
pub mod modification;

// Collaborator traits and their result sum types
pub mod traits;
