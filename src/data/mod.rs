//! Data layer: core types, file formats, and dataset access.
//!
//! Architecture:
//! ```text
//!   <root>/dynamic/fields/field_arrays.mat
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  layout   │  category → first existing candidate path
//!   └──────────┘
//!        │
//!        ▼
//!   ┌──────────┐   miss   ┌──────┐  not MAT v5  ┌────────┐
//!   │  cache    │ ───────▶ │ mat  │ ───────────▶ │ octave │
//!   └──────────┘          └──────┘              └────────┘
//!        │                      │                    │
//!        │ hit                  ▼                    ▼
//!        │               ┌──────────────────────────────┐
//!        │               │ alias  legacy → canonical     │
//!        │               └──────────────────────────────┘
//!        ▼                              │
//!   Arc<NamedArrayTable> ◀──────────────┘
//! ```

pub mod accessor;
pub mod alias;
pub mod cache;
pub mod error;
pub mod layout;
pub mod mat;
pub mod model;
pub mod octave;
