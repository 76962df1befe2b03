//! The named tool set for a session.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::exec::{BashTool, JobKillTool, JobOutputTool};
use crate::fetch::{DownloadTool, FetchTool, UrlFetcher};
use crate::file_ops::{EditTool, LsTool, MultiEditTool, ViewTool, WriteTool};
use crate::lsp::{DiagnosticsTool, ReferencesTool};
use crate::sandbox::SandboxClient;
use crate::search::{GlobTool, GrepTool};
use crate::{Tool, ToolInfo};

/// Registry of named tools. Built once with the builtin set; MCP tools
/// are registered on top as servers connect.
#[derive(Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn empty() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// The builtin tool set, all executing against the given sandbox.
    pub fn builtin(sandbox: Arc<SandboxClient>, fetcher: UrlFetcher) -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(BashTool::new(sandbox.clone())));
        registry.register(Arc::new(ViewTool::new(sandbox.clone())));
        registry.register(Arc::new(WriteTool::new(sandbox.clone())));
        registry.register(Arc::new(EditTool::new(sandbox.clone())));
        registry.register(Arc::new(MultiEditTool::new(sandbox.clone())));
        registry.register(Arc::new(LsTool::new(sandbox.clone())));
        registry.register(Arc::new(GrepTool::new(sandbox.clone())));
        registry.register(Arc::new(GlobTool::new(sandbox.clone())));
        registry.register(Arc::new(FetchTool::new(fetcher.clone())));
        registry.register(Arc::new(DownloadTool::new(fetcher, sandbox.clone())));
        registry.register(Arc::new(DiagnosticsTool::new(sandbox.clone())));
        registry.register(Arc::new(ReferencesTool::new(sandbox.clone())));
        registry.register(Arc::new(JobOutputTool::new(sandbox.clone())));
        registry.register(Arc::new(JobKillTool::new(sandbox)));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.info().name, tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn infos(&self) -> Vec<ToolInfo> {
        self.tools.values().map(|t| t.info()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn registry() -> ToolRegistry {
        let sandbox =
            Arc::new(SandboxClient::new("http://localhost:1", Duration::from_secs(1)).unwrap());
        ToolRegistry::builtin(sandbox, UrlFetcher::new().unwrap())
    }

    #[test]
    fn builtin_set_is_complete() {
        let registry = registry();
        for name in [
            "bash",
            "view",
            "write",
            "edit",
            "multi_edit",
            "ls",
            "grep",
            "glob",
            "download",
            "fetch",
            "diagnostics",
            "references",
            "job_output",
            "job_kill",
        ] {
            assert!(registry.get(name).is_some(), "missing builtin tool {name}");
        }
        assert_eq!(registry.len(), 14);
    }

    #[test]
    fn infos_expose_schemas() {
        let registry = registry();
        for info in registry.infos() {
            assert!(!info.description.is_empty(), "{} lacks description", info.name);
            assert!(info.parameters.is_object(), "{} lacks schema", info.name);
        }
    }

    #[test]
    fn unknown_tool_is_none() {
        assert!(registry().get("does_not_exist").is_none());
    }
}
