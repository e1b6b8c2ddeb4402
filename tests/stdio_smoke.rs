use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};
use tempfile::TempDir;

#[test]
fn stdio_smoke() {
    // `cargo test` sets this for integration tests.
    let bin = env!("CARGO_BIN_EXE_nsxref");

    let dir = TempDir::new().expect("tempdir");
    let root = dir.path();
    std::fs::write(
        root.join("cart.ts"),
        "/** @namespace Shop/Cart */\nexport class Cart {\n  add() {}\n}\n",
    )
    .unwrap();
    std::fs::write(
        root.join("cart.plugin.ts"),
        "export default {\n  'Shop/Cart': { 'member-function': { add: () => {}, remove: () => {} } },\n  'Shop/Nope': { function: () => {} },\n};\n",
    )
    .unwrap();

    let mut child = Command::new(bin)
        .arg("--root")
        .arg(root)
        .arg("serve")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn nsxref serve");

    {
        let stdin = child.stdin.as_mut().expect("child stdin");

        // Keep each JSON-RPC message on one line (server reads by lines()).
        let requests = [
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "initialize",
                "params": { "protocolVersion": "2024-11-05" }
            }),
            // notification: no reply expected
            serde_json::json!({ "jsonrpc": "2.0", "method": "notifications/initialized" }),
            serde_json::json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }),
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": { "name": "diagnostics", "arguments": { "path": "cart.plugin.ts" } }
            }),
            serde_json::json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": { "name": "lookup_references", "arguments": { "namespace": "Shop/Cart" } }
            }),
            serde_json::json!({ "jsonrpc": "2.0", "id": 5, "method": "no/such/method" }),
        ];
        for req in requests {
            writeln!(stdin, "{req}").unwrap();
        }
    }

    // Close stdin so the server loop can exit.
    drop(child.stdin.take());

    let stdout = child.stdout.take().expect("child stdout");
    let reader = BufReader::new(stdout);

    let mut replies_by_id: HashMap<i64, serde_json::Value> = HashMap::new();
    for line in reader.lines() {
        let line = line.expect("read stdout line");
        if line.trim().is_empty() {
            continue;
        }
        let v: serde_json::Value = serde_json::from_str(&line).expect("stdout is json");
        let id = v.get("id").and_then(|x| x.as_i64()).expect("json-rpc response id");
        replies_by_id.insert(id, v);
    }

    let status = child.wait().expect("wait child");
    assert!(status.success(), "server should exit cleanly on EOF");
    assert_eq!(replies_by_id.len(), 5, "notification must not be answered");

    // initialize
    {
        let v = &replies_by_id[&1];
        assert_eq!(v["jsonrpc"], "2.0");
        assert_eq!(v["result"]["serverInfo"]["name"], "nsxref");
    }

    // tools/list
    {
        let tools = replies_by_id[&2]["result"]["tools"].as_array().expect("tools array");
        let names: std::collections::HashSet<&str> =
            tools.iter().filter_map(|t| t["name"].as_str()).collect();
        for required in [
            "lookup_declaration",
            "lookup_references",
            "diagnostics",
            "notify_file_changed",
            "resolve_implementations",
            "resolve_declared_member",
            "find_references",
            "goto_definition",
            "quick_info",
        ] {
            assert!(names.contains(required), "missing tool: {required}");
        }
    }

    let text_of = |id: i64| -> serde_json::Value {
        let result = &replies_by_id[&id]["result"];
        assert_eq!(result["isError"], false, "tool call {id} failed: {result}");
        let text = result["content"][0]["text"].as_str().expect("text content");
        serde_json::from_str(text).expect("tool text is json")
    };

    // diagnostics
    {
        let diags = text_of(3);
        let codes: Vec<i64> = diags
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["code"].as_i64().unwrap())
            .collect();
        assert_eq!(codes, vec![191920, 191919]);
    }

    // lookup_references
    {
        let refs = text_of(4);
        let refs = refs.as_array().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0]["registrations"].as_array().unwrap().len(), 2);
    }

    // unknown method
    assert_eq!(replies_by_id[&5]["error"]["code"], -32601);
}
