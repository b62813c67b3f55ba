// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Index installation
//!
//! Makes sure every physical structure a logical index needs exists for the
//! bound context: the index template (partitioned resources), the current
//! storage index and the alias. Existing structures are left alone, so
//! installation is safe to repeat.

use crate::backend::SearchBackend;
use crate::index::{IndexDescriptor, IndexResolver, LogicalIndex};
use crate::service::storage_error;
use cdp_core::{current_context, CdpError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::ops::AddAssign;
use std::path::PathBuf;
use std::sync::Arc;

/// What an installation run created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub templates: Vec<String>,
    pub indices: Vec<String>,
    pub aliases: Vec<String>,
}

impl InstallReport {
    /// Nothing had to be created
    pub fn is_noop(&self) -> bool {
        self.templates.is_empty() && self.indices.is_empty() && self.aliases.is_empty()
    }
}

impl AddAssign for InstallReport {
    fn add_assign(&mut self, rhs: Self) {
        self.templates.extend(rhs.templates);
        self.indices.extend(rhs.indices);
        self.aliases.extend(rhs.aliases);
    }
}

/// Creates templates, indices and aliases on demand
pub struct IndexInstaller {
    backend: Arc<dyn SearchBackend>,
    resolver: Arc<IndexResolver>,
    mappings_dir: Option<PathBuf>,
}

impl IndexInstaller {
    pub fn new(backend: Arc<dyn SearchBackend>, resolver: Arc<IndexResolver>) -> Self {
        Self {
            backend,
            resolver,
            mappings_dir: None,
        }
    }

    /// Read schema bodies from `dir/<schema file>`
    pub fn with_mappings_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.mappings_dir = Some(dir.into());
        self
    }

    /// Index body (mappings, settings) for a descriptor
    ///
    /// A missing file or directory yields an empty body.
    pub async fn schema(&self, descriptor: &IndexDescriptor) -> Result<Value> {
        let Some(dir) = &self.mappings_dir else {
            return Ok(json!({}));
        };
        let path = dir.join(&descriptor.schema_file);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let schema: Value = serde_json::from_str(&text).map_err(|e| {
                    CdpError::Config(format!("invalid schema file {}: {e}", path.display()))
                })?;
                if !schema.is_object() {
                    return Err(CdpError::Config(format!(
                        "schema file {} must hold an object",
                        path.display()
                    )));
                }
                Ok(schema)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no schema file, using engine defaults");
                Ok(json!({}))
            }
            Err(e) => Err(CdpError::Config(format!(
                "cannot read schema file {}: {e}",
                path.display()
            ))),
        }
    }

    /// Install one logical index for the bound context
    pub async fn install(&self, logical: LogicalIndex) -> Result<InstallReport> {
        self.install_at(logical, Utc::now()).await
    }

    /// Install with the partition current at `now`
    #[tracing::instrument(skip(self), fields(tenant = %current_context().tenant()))]
    pub async fn install_at(&self, logical: LogicalIndex, now: DateTime<Utc>) -> Result<InstallReport> {
        let descriptor = self.resolver.descriptor(logical);
        let schema = self.schema(descriptor).await?;
        let alias = self.resolver.resolve_alias(logical);
        let storage_index = self.resolver.resolve_storage_index(logical, now)?;
        let mut report = InstallReport::default();

        if let Some(template) = self.resolver.resolve_template(logical) {
            let exists = self
                .backend
                .template_exists(&template.name)
                .await
                .map_err(|e| storage_error(e, &template.name))?;
            if !exists {
                let mut body = schema.clone();
                body["aliases"] = json!({ &template.alias: {} });
                let template_body = json!({
                    "index_patterns": [template.pattern],
                    "template": body,
                });
                self.backend
                    .put_template(&template.name, &template_body)
                    .await
                    .map_err(|e| storage_error(e, &template.name))?;
                tracing::info!(template = %template.name, "created index template");
                report.templates.push(template.name);
            }
        }

        let exists = self
            .backend
            .index_exists(&storage_index)
            .await
            .map_err(|e| storage_error(e, &storage_index))?;
        if !exists {
            self.backend
                .create_index(&storage_index, &schema)
                .await
                .map_err(|e| storage_error(e, &storage_index))?;
            tracing::info!(index = %storage_index, "created index");
            report.indices.push(storage_index.clone());
        }

        if descriptor.aliased && alias != storage_index {
            let exists = self
                .backend
                .alias_exists(&alias)
                .await
                .map_err(|e| storage_error(e, &alias))?;
            if !exists {
                self.backend
                    .put_alias(&storage_index, &alias)
                    .await
                    .map_err(|e| storage_error(e, &alias))?;
                tracing::info!(index = %storage_index, %alias, "created alias");
                report.aliases.push(alias);
            }
        }

        Ok(report)
    }

    /// Install every catalogued index for the bound context
    pub async fn install_all(&self) -> Result<InstallReport> {
        let now = Utc::now();
        let mut report = InstallReport::default();
        for logical in LogicalIndex::ALL {
            report += self.install_at(logical, now).await?;
        }
        Ok(report)
    }
}
