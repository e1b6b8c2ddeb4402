use anyhow::Result;
use serde::Serialize;
use serde_json::json;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use crate::config::load_config;
use crate::declaration::{DeclarationTarget, NamespaceDeclaration};
use crate::index::NamespaceIndex;
use crate::navigation::find_node_at_position;
use crate::project::{Project, TreeProvider};
use crate::reference::NamespaceReference;
use crate::target::TargetKind;

/// JSON view of a declaration, as printed by `lookup` and the stdio tools.
pub fn declaration_json(decl: &NamespaceDeclaration) -> serde_json::Value {
    let target = match decl.target() {
        DeclarationTarget::Function(node) => json!({
            "kind": "function",
            "name": node.name,
            "location": node.location,
        }),
        DeclarationTarget::Class { chain } => json!({
            "kind": "class",
            "chain": chain.iter().map(|class| json!({
                "name": class.name,
                "file": class.file,
                "members": class.members.iter().map(|m| json!({
                    "name": m.node.name,
                    "kind": m.target_kind(),
                    "line": m.node.location.line,
                })).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        }),
    };
    json!({
        "namespace": decl.namespace(),
        "location": decl.location(),
        "target": target,
    })
}

/// JSON view of a plugin registration block.
pub fn reference_json(reference: &NamespaceReference) -> serde_json::Value {
    let registrations: Vec<serde_json::Value> = reference
        .registrations()
        .entries()
        .map(|(config, imp)| {
            json!({
                "kind": config.kind,
                "name": config.name,
                "location": imp.location,
            })
        })
        .collect();
    json!({
        "namespace": reference.namespace(),
        "location": reference.namespace_location(),
        "registrations": registrations,
    })
}

fn pretty<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("serialization failed: {e}"))
}

/// Resolve a path parameter: if absolute, use as-is; otherwise join to repo_root.
fn resolve_path(repo_root: &Path, p: &str) -> PathBuf {
    let pb = PathBuf::from(p);
    if pb.is_absolute() { pb } else { repo_root.join(p) }
}

#[derive(Default)]
pub struct ServerState {
    repo_root: Option<PathBuf>,
    index: Option<NamespaceIndex<Project>>,
}

impl ServerState {
    pub fn new(repo_root: Option<PathBuf>) -> Self {
        Self {
            repo_root,
            index: None,
        }
    }

    fn repo_root_from_params(&mut self, params: &serde_json::Value) -> PathBuf {
        let repo_root = params
            .get("repoPath")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .or_else(|| self.repo_root.clone())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        if self.repo_root.as_ref() != Some(&repo_root) {
            // Different project: drop the old index.
            self.index = None;
        }
        self.repo_root = Some(repo_root.clone());
        repo_root
    }

    /// Index for the repo named by `params`, loading the project on first use.
    fn index_for(&mut self, params: &serde_json::Value) -> Result<(PathBuf, &mut NamespaceIndex<Project>)> {
        let repo_root = self.repo_root_from_params(params);
        let index = match self.index.take() {
            Some(index) => index,
            None => {
                let cfg = load_config(&repo_root);
                let project = Project::load(&repo_root, &cfg)?;
                tracing::info!("loaded {} source files from {}", project.len(), repo_root.display());
                NamespaceIndex::new(project, &cfg)
            }
        };
        Ok((repo_root, self.index.insert(index)))
    }

    fn tool_list(&self, id: serde_json::Value) -> serde_json::Value {
        let position = json!({
            "type": "object",
            "properties": {
                "repoPath": { "type": "string" },
                "path": { "type": "string", "description": "Source file (absolute or repo-relative)" },
                "offset": { "type": "integer", "minimum": 0, "description": "Byte offset in the file" }
            },
            "required": ["path", "offset"]
        });
        let namespace = json!({
            "type": "object",
            "properties": {
                "repoPath": { "type": "string" },
                "namespace": { "type": "string", "description": "Namespace, e.g. Hello/World" }
            },
            "required": ["namespace"]
        });

        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [
                    {
                        "name": "lookup_declaration",
                        "description": "The @namespace declaration for a namespace: where it is and which members its class (and superclasses) declare.",
                        "inputSchema": namespace
                    },
                    {
                        "name": "lookup_references",
                        "description": "Every plugin registration block for a namespace, with its registered members.",
                        "inputSchema": namespace
                    },
                    {
                        "name": "diagnostics",
                        "description": "Warnings for plugin registrations targeting undeclared namespaces or members. Without `path`, covers every plugin file.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "repoPath": { "type": "string" },
                                "path": { "type": "string" }
                            }
                        }
                    },
                    {
                        "name": "notify_file_changed",
                        "description": "Re-read one file from disk and update the index. Call after every edit.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "repoPath": { "type": "string" },
                                "path": { "type": "string" }
                            },
                            "required": ["path"]
                        }
                    },
                    {
                        "name": "resolve_implementations",
                        "description": "Registered implementations of one declared member.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "repoPath": { "type": "string" },
                                "namespace": { "type": "string" },
                                "kind": { "type": "string", "enum": ["function", "member-function", "member-property", "static-member"] },
                                "member": { "type": "string", "description": "Member name (ignored for kind=function)" }
                            },
                            "required": ["namespace", "kind"]
                        }
                    },
                    {
                        "name": "resolve_declared_member",
                        "description": "The declared member a plugin registration at a position implements.",
                        "inputSchema": position
                    },
                    {
                        "name": "find_references",
                        "description": "From a @namespace annotation or a declared member to its plugin registrations.",
                        "inputSchema": position
                    },
                    {
                        "name": "goto_definition",
                        "description": "From a plugin registration key to the declaration it targets.",
                        "inputSchema": position
                    },
                    {
                        "name": "quick_info",
                        "description": "Namespace under the cursor, when it rests on a @namespace annotation.",
                        "inputSchema": position
                    }
                ]
            }
        })
    }

    fn tool_call(&mut self, id: serde_json::Value, params: &serde_json::Value) -> serde_json::Value {
        let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        let ok = |text: String| {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{"type":"text","text": text }], "isError": false }
            })
        };

        let err = |msg: String| {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{"type":"text","text": msg }], "isError": true }
            })
        };

        let (repo_root, index) = match self.index_for(&args) {
            Ok(v) => v,
            Err(e) => return err(format!("failed to load project: {e:#}")),
        };

        let str_arg = |key: &str| args.get(key).and_then(|v| v.as_str());
        let position = || -> std::result::Result<(PathBuf, usize), String> {
            let path = str_arg("path").ok_or_else(|| "Missing path".to_string())?;
            let offset = args
                .get("offset")
                .and_then(|v| v.as_u64())
                .ok_or_else(|| "Missing offset".to_string())?;
            Ok((resolve_path(&repo_root, path), offset as usize))
        };

        match name {
            "lookup_declaration" => {
                let Some(ns) = str_arg("namespace") else {
                    return err("Missing namespace".to_string());
                };
                match index.lookup_declaration(ns) {
                    Some(decl) => ok(pretty(&declaration_json(decl))),
                    None => ok(format!("No declaration for namespace {ns}")),
                }
            }
            "lookup_references" => {
                let Some(ns) = str_arg("namespace") else {
                    return err("Missing namespace".to_string());
                };
                let refs: Vec<serde_json::Value> =
                    index.lookup_references(ns).into_iter().map(reference_json).collect();
                ok(pretty(&refs))
            }
            "diagnostics" => {
                let diags = match str_arg("path") {
                    Some(p) => index.diagnostics_for_file(&resolve_path(&repo_root, p)),
                    None => index.all_diagnostics(),
                };
                ok(pretty(&diags))
            }
            "notify_file_changed" => {
                let Some(p) = str_arg("path") else {
                    return err("Missing path".to_string());
                };
                let rescanned = index.notify_file_changed(&resolve_path(&repo_root, p));
                ok(pretty(&json!({ "rescanned": rescanned })))
            }
            "resolve_implementations" => {
                let Some(ns) = str_arg("namespace") else {
                    return err("Missing namespace".to_string());
                };
                let kind = match str_arg("kind").unwrap_or("").parse::<TargetKind>() {
                    Ok(k) => k,
                    Err(e) => return err(e.to_string()),
                };
                let member = str_arg("member").unwrap_or("");
                ok(pretty(&index.resolve_implementation_for_member(ns, kind, member)))
            }
            "resolve_declared_member" => {
                let (path, offset) = match position() {
                    Ok(p) => p,
                    Err(e) => return err(e),
                };
                index.provider_mut().add_missing_file(&path);
                let node = index
                    .provider()
                    .source_file(&path)
                    .and_then(|tree| find_node_at_position(tree, offset));
                let Some(node) = node else {
                    return ok("null".to_string());
                };
                ok(pretty(&index.resolve_declared_member_for_implementation(&path, node)))
            }
            "find_references" => match position() {
                Ok((path, offset)) => ok(pretty(&index.find_references(&path, offset))),
                Err(e) => err(e),
            },
            "goto_definition" => match position() {
                Ok((path, offset)) => ok(pretty(&index.goto_definition(&path, offset))),
                Err(e) => err(e),
            },
            "quick_info" => match position() {
                Ok((path, offset)) => ok(pretty(&index.quick_info(&path, offset))),
                Err(e) => err(e),
            },
            _ => err(format!("Unknown tool: {name}")),
        }
    }
}

pub fn run_stdio_server(repo_root: Option<PathBuf>) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();

    let mut state = ServerState::new(repo_root);

    for line in stdin.lock().lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::debug!("ignoring malformed request: {e}");
                continue;
            }
        };

        // Notifications carry no id and get no reply.
        if msg.get("id").is_none() {
            continue;
        }

        let id = msg.get("id").cloned().unwrap_or(json!(null));
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");

        let reply = match method {
            "initialize" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": msg.get("params").and_then(|p| p.get("protocolVersion")).cloned().unwrap_or(json!("2024-11-05")),
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": "nsxref", "version": env!("CARGO_PKG_VERSION") }
                }
            }),
            "ping" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {}
            }),
            "tools/list" => state.tool_list(id),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or(json!({}));
                state.tool_call(id, &params)
            }
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {method}") }
            }),
        };

        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn call(state: &mut ServerState, root: &Path, name: &str, mut args: serde_json::Value) -> (bool, String) {
        args["repoPath"] = json!(root);
        let reply = state.tool_call(json!(1), &json!({ "name": name, "arguments": args }));
        let result = &reply["result"];
        (
            result["isError"].as_bool().unwrap(),
            result["content"][0]["text"].as_str().unwrap().to_string(),
        )
    }

    #[test]
    fn tools_answer_over_a_loaded_project() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("cart.ts"),
            "/** @namespace Cart */\nexport class Cart { add() {} }\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("cart.plugin.ts"),
            "export default { Cart: { 'member-function': { add: () => {}, nope: 1 } } };\n",
        )
        .unwrap();

        let mut state = ServerState::default();
        let (is_err, text) = call(&mut state, dir.path(), "lookup_declaration", json!({ "namespace": "Cart" }));
        assert!(!is_err);
        let decl: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(decl["target"]["kind"], "class");
        assert_eq!(decl["target"]["chain"][0]["members"][0]["kind"], "member-function");

        let (_, text) = call(&mut state, dir.path(), "diagnostics", json!({ "path": "cart.plugin.ts" }));
        let diags: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(diags.as_array().unwrap().len(), 1);
        assert_eq!(diags[0]["code"], 191920);

        let (is_err, text) = call(&mut state, dir.path(), "resolve_implementations", json!({ "namespace": "Cart", "kind": "bogus" }));
        assert!(is_err);
        assert!(text.contains("unknown target kind"));

        let (is_err, text) = call(&mut state, dir.path(), "goto_definition", json!({ "path": "cart.plugin.ts" }));
        assert!(is_err);
        assert_eq!(text, "Missing offset");
    }
}
