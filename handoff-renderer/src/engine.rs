//! Tera rendering engine: [`TemplateEngine`] and [`Renderer`].
//!
//! | Workload        | Templates                                          |
//! |-----------------|----------------------------------------------------|
//! | key-value store | `keydb/command.tera`, `keydb/layer.yaml.tera`      |
//! | web front-end   | `webserver/layer.yaml.tera`                        |
//!
//! Layer templates render YAML that is parsed back into a [`Layer`]. String
//! values go through `json_encode()` so they land as quoted YAML scalars.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tera::Tera;

use handoff_core::{ConnectionFact, Layer, Slot, UnitConfig, WorkloadKind};

use crate::context::RenderContext;
use crate::error::RenderError;
use crate::profile::WorkloadProfile;

// ---------------------------------------------------------------------------
// Embedded templates, baked into the binary at compile time via include_str!
// ---------------------------------------------------------------------------

const KEYDB_COMMAND: &str = "keydb/command.tera";

const EMBEDDED: [(&str, &str); 3] = [
    (KEYDB_COMMAND, include_str!("templates/keydb/command.tera")),
    ("keydb/layer.yaml.tera", include_str!("templates/keydb/layer.yaml.tera")),
    (
        "webserver/layer.yaml.tera",
        include_str!("templates/webserver/layer.yaml.tera"),
    ),
];

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// Template name for `path` relative to the override root, `/`-separated.
fn override_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Every `*.tera` file below `root`, keyed by its override name. A missing
/// root yields no overrides.
fn read_overrides(root: &Path) -> Result<BTreeMap<String, String>, RenderError> {
    let mut found = BTreeMap::new();
    if !root.is_dir() {
        return Ok(found);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let listing = fs::read_dir(&dir).map_err(|source| RenderError::Io {
            path: dir.clone(),
            source,
        })?;
        for entry in listing {
            let path = entry
                .map_err(|source| RenderError::Io {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if path.is_dir() {
                pending.push(path);
            } else if path.extension().is_some_and(|ext| ext == "tera") {
                let body = fs::read_to_string(&path).map_err(|source| RenderError::Io {
                    path: path.clone(),
                    source,
                })?;
                let name = override_name(root, &path);
                tracing::debug!(template = %name, "template overridden");
                found.insert(name, body);
            }
        }
    }
    Ok(found)
}

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// Tera-based engine with optional user overrides.
///
/// `user_template_dir` may contain `.tera` files that replace embedded
/// defaults under the same relative name, e.g. `keydb/command.tera`.
pub struct TemplateEngine {
    tera: Tera,
}

impl TemplateEngine {
    pub fn new(user_template_dir: Option<&Path>) -> Result<Self, RenderError> {
        let mut sources: BTreeMap<String, String> = EMBEDDED
            .iter()
            .map(|(name, body)| (name.to_string(), body.to_string()))
            .collect();
        if let Some(dir) = user_template_dir {
            sources.extend(read_overrides(dir)?);
        }

        let mut tera = Tera::default();
        tera.add_raw_templates(sources)?;
        Ok(Self { tera })
    }

    /// Render the key-value store's command line. Only the template's final
    /// line break is dropped; configured values are kept byte for byte.
    pub fn render_command(&self, ctx: &RenderContext) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context()?;
        let mut rendered = self.tera.render(KEYDB_COMMAND, &tera_ctx)?;
        if rendered.ends_with('\n') {
            rendered.pop();
            if rendered.ends_with('\r') {
                rendered.pop();
            }
        }
        Ok(rendered)
    }

    /// Render the full desired layer for `kind`.
    pub fn render_layer(
        &self,
        ctx: &RenderContext,
        kind: WorkloadKind,
    ) -> Result<Layer, RenderError> {
        let profile = WorkloadProfile::of(kind);
        let mut tera_ctx = ctx.to_tera_context()?;
        if kind == WorkloadKind::KeyValueStore {
            let command = self.render_command(ctx)?;
            tracing::debug!(%command, "rendered keydb command");
            tera_ctx.insert("command", &command);
        }
        let yaml = self.tera.render(profile.layer_template, &tera_ctx)?;
        serde_yaml::from_str(&yaml).map_err(|source| RenderError::Layer {
            template: profile.layer_template.to_string(),
            source,
        })
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Computes a workload's desired [`Layer`] from scratch on every call.
///
/// Create once with [`Renderer::new`] and reuse.
pub struct Renderer {
    engine: TemplateEngine,
}

impl Renderer {
    /// Embedded templates only.
    pub fn new() -> Result<Self, RenderError> {
        TemplateEngine::new(None).map(|engine| Self { engine })
    }

    /// Embedded templates plus overrides from `dir`.
    pub fn with_overrides(dir: &Path) -> Result<Self, RenderError> {
        TemplateEngine::new(Some(dir)).map(|engine| Self { engine })
    }

    /// The desired layer for a unit with `config` and cached `connection`.
    pub fn desired_layer(
        &self,
        config: &UnitConfig,
        connection: &Slot<ConnectionFact>,
    ) -> Result<Layer, RenderError> {
        let ctx = RenderContext::from_inputs(config, connection);
        self.engine.render_layer(&ctx, config.kind())
    }

    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }
}
