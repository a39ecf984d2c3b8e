use serde_json::json;

pub fn ok(id: &str, result: serde_json::Value) -> serde_json::Value {
    json!({
        "id": id,
        "ok": true,
        "result": result
    })
}

pub fn err(
    id: &str,
    code: &str,
    message: impl Into<String>,
    details: Option<serde_json::Value>,
) -> serde_json::Value {
    let mut error = json!({
        "code": code,
        "message": message.into(),
    });
    if let Some(d) = details {
        error["details"] = d;
    }
    json!({
        "id": id,
        "ok": false,
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_carries_details_only_when_present() {
        let plain = err("1", "bad_params", "missing x", None);
        assert_eq!(plain["ok"], false);
        assert!(plain["error"].get("details").is_none());

        let detailed = err("2", "below_actual_count", "too low", Some(json!({ "actualCount": 5 })));
        assert_eq!(detailed["error"]["details"]["actualCount"], 5);
        assert_eq!(ok("3", json!({}))["ok"], true);
    }
}
