// ============================================================
// Layer 4 — Document Data
// ============================================================
// This layer handles everything between the .docx bytes on disk
// and the ordered list of CorrectableUnits the engine works on.
//
// The flow in this order:
//
//   .docx bytes
//       │
//       ▼
//   DocxValidator     → structural checks before and after
//       │
//       ▼
//   DocxPackage       → ZIP members, untouched ones kept verbatim
//       │
//       ▼
//   XmlPart           → owned quick-xml events per part
//       │
//       ▼
//   DocxLoader        → paragraphs → CorrectableUnits, and back
//       │
//       ▼
//   Chunker           → token-bounded chunks for the scheduler
//
//   cleanup           → duplicate trailing paragraph post-pass
//   Preprocessor      → text normalisation shared by the engine
//
// Each module is responsible for exactly one step.
//
// Reference: ECMA-376 (Office Open XML)
//            Rust Book §13 (Iterators and Closures)

/// ZIP container of XML parts
pub mod package;

/// Event-level model of one WordprocessingML part
pub mod xml_part;

/// Enumerates units from parts and writes corrections back
pub mod loader;

/// Duplicate trailing paragraph removal
pub mod cleanup;

/// Structural validation of a whole package
pub mod validator;

/// Text normalisation and comparison helpers
pub mod preprocessor;

/// Groups units into token-bounded chunks
pub mod chunker;
