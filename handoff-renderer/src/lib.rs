//! # handoff-renderer
//!
//! Computes the desired service layer of each workload from its
//! configuration and cached connection, using Tera templates. Also carries
//! the static workload profiles and one-time setup resources.
//!
//! ```rust,no_run
//! use handoff_core::{Slot, UnitConfig, WorkloadKind};
//! use handoff_renderer::Renderer;
//!
//! fn show() -> Result<(), handoff_renderer::RenderError> {
//!     let renderer = Renderer::new()?;
//!     let cfg = UnitConfig::default_for(WorkloadKind::KeyValueStore);
//!     let layer = renderer.desired_layer(&cfg, &Slot::Unset)?;
//!     println!("{}", layer.services["keydb"].command);
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod profile;
pub mod resources;

pub use context::RenderContext;
pub use engine::{Renderer, TemplateEngine};
pub use error::RenderError;
pub use profile::{RestartPolicy, WorkloadProfile};
pub use resources::{setup_steps, SetupStep};
