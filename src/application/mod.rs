// ============================================================
// Layer 2 — Application / Use Cases
// ============================================================
// This layer orchestrates all the other layers to accomplish
// one goal: correcting a .docx document end to end.
//
// Rules for this layer:
//   - No text-correction logic here (that's Layer 5)
//   - No printing here (that's Layer 1)
//   - No XML or ZIP handling (that's Layer 4)
//   - Only workflow coordination and configuration
//
// Reference: Clean Architecture pattern
//            Rust Book §7 (Module System)

// Run configuration, loaded from JSON
pub mod config;

// The correction workflow (Document Assembler)
pub mod correct_use_case;
