//! 設定値の再帰マージ

use serde_json::Value;

/// `overlay` を `base` に再帰的にマージする
///
/// 優先順位: どの階層でも `overlay` 側が勝つ。
/// - 両方がオブジェクトのキーは再帰的にマージ
/// - それ以外（スカラー、配列、null）は `overlay` の値で置き換え
/// - `overlay` に無いキーは `base` の値をそのまま残す
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_untouched_keys_survive() {
        let mut base = json!({"a": "1", "b": "2"});
        deep_merge(&mut base, json!({"b": "3", "c": "4"}));
        assert_eq!(base, json!({"a": "1", "b": "3", "c": "4"}));
    }

    #[test]
    fn test_nested_objects_merge_recursively() {
        let mut base = json!({
            "connection": {"type": "unix", "socket": "/var/lib/incus/unix.socket"},
            "timeouts": {"request": 30, "operation": 300}
        });
        deep_merge(&mut base, json!({"timeouts": {"operation": 600}}));

        assert_eq!(base["timeouts"]["request"], 30);
        assert_eq!(base["timeouts"]["operation"], 600);
        assert_eq!(base["connection"]["type"], "unix");
    }

    #[test]
    fn test_overlay_wins_on_type_mismatch() {
        let mut base = json!({"verify": {"ca": "/etc/ca.pem"}});
        deep_merge(&mut base, json!({"verify": false}));
        assert_eq!(base, json!({"verify": false}));

        let mut base = json!({"verify": true});
        deep_merge(&mut base, json!({"verify": {"ca": "/etc/ca.pem"}}));
        assert_eq!(base, json!({"verify": {"ca": "/etc/ca.pem"}}));
    }

    #[test]
    fn test_arrays_are_replaced() {
        let mut base = json!({"profiles": ["default", "gpu"]});
        deep_merge(&mut base, json!({"profiles": ["web"]}));
        assert_eq!(base, json!({"profiles": ["web"]}));
    }

    #[test]
    fn test_null_overlay_replaces() {
        let mut base = json!({"cert": "/tmp/client.crt"});
        deep_merge(&mut base, json!({"cert": null}));
        assert_eq!(base, json!({"cert": null}));
    }
}
