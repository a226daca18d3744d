mod common;

use std::collections::HashMap;
use std::sync::Arc;

use broker::channel::{reply_line, serve_lines};
use common::{host, start, RUNNING_VERSION};
use serde_json::{json, Value};

#[tokio::test]
async fn recognized_lines_get_exactly_one_reply_line() {
    let host = host();
    let running = start(&host, RUNNING_VERSION).await;
    let input = concat!(
        "{\"id\":1,\"what\":\"getRulesetData\"}\n",
        "{\"id\":2,\"what\":\"getTabSwitchMetrics\"}\n",
        "\n",
        "not json\n",
        "{\"id\":3,\"what\":\"grantGreatPowers\",\"hostname\":\"example.com\"}\n",
        "{\"id\":4,\"what\":\"grantGreatPowers\"}\n",
    );

    let output = serve_lines(Arc::clone(&running.dispatcher), input.as_bytes(), Vec::new())
        .await
        .unwrap();

    let replies: HashMap<i64, Value> = String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| {
            let mut line: Value = serde_json::from_str(line).unwrap();
            (line["id"].as_i64().unwrap(), line["reply"].take())
        })
        .collect();
    assert_eq!(replies.len(), 3);
    assert_eq!(replies[&1]["enabledRulesets"], json!(["default"]));
    assert_eq!(replies[&3], json!(true));
    assert_eq!(replies[&4], json!(false));
}

#[tokio::test]
async fn reply_line_skips_what_the_dispatcher_ignores() {
    let host = host();
    let running = start(&host, RUNNING_VERSION).await;

    assert!(reply_line(&running.dispatcher, "   ").is_none());
    assert!(reply_line(&running.dispatcher, "{").is_none());
    assert!(reply_line(&running.dispatcher, r#"{"id":9,"what":"unknown"}"#).is_none());

    let apply = r#"{"what":"applyRulesets","enabledRulesets":["A"]}"#;
    let reply = reply_line(&running.dispatcher, apply).unwrap().await.unwrap();
    assert_eq!(
        serde_json::from_str::<Value>(&reply).unwrap(),
        json!({ "id": null, "reply": null })
    );
}
