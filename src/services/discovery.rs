use serde_json::{json, Value};

use crate::models::NATIVE_GROUP;

/// Zabbix 低级发现（LLD）数据：native 组加上当前存活的进程组
pub fn discovery_payload(groups: &[String]) -> Value {
    let mut names: Vec<&str> = groups
        .iter()
        .map(String::as_str)
        .filter(|name| *name != NATIVE_GROUP)
        .collect();
    names.sort_unstable();
    names.dedup();

    let data: Vec<Value> = std::iter::once(NATIVE_GROUP)
        .chain(names)
        .map(|name| json!({ "{#NAME}": name }))
        .collect();
    json!({ "data": data })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload() {
        let payload = discovery_payload(&["shop".into(), "blog".into(), "shop".into()]);
        assert_eq!(
            payload.to_string(),
            r##"{"data":[{"{#NAME}":"native"},{"{#NAME}":"blog"},{"{#NAME}":"shop"}]}"##
        );
    }

    #[test]
    fn test_payload_without_groups() {
        let payload = discovery_payload(&[]);
        assert_eq!(payload["data"].as_array().map(Vec::len), Some(1));
    }
}
