//! 从 Apache 的 ports.conf 中找出监听地址
//!
//! 只识别 `Listen` 指令：`Listen 80`、`Listen 127.0.0.1:8080` 以及带协议的
//! `Listen [::]:443 https`。通配地址被替换为本机回环地址。

use std::fmt;
use std::fs;
use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{MonitorError, Result};

/// Debian 系 Apache 的默认位置
pub const PORTS_CONF: &str = "/etc/apache2/ports.conf";

lazy_static! {
    static ref ADDRESS_PORT: Regex = Regex::new(r"^(.+):(\d+)$").unwrap();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkAddress {
    pub protocol: String,
    pub address: String,
    pub port: u16,
}

impl NetworkAddress {
    /// 只有端口时，443 推断为 https，其余为 http
    pub fn with_port(port: u16) -> Self {
        Self {
            protocol: if port == 443 { "https" } else { "http" }.to_string(),
            address: "127.0.0.1".to_string(),
            port,
        }
    }

    /// 默认端口不出现在 URL 中
    pub fn url(&self) -> String {
        let default_port = (self.protocol == "http" && self.port == 80)
            || (self.protocol == "https" && self.port == 443);
        if default_port {
            format!("{}://{}", self.protocol, self.address)
        } else {
            format!("{}://{}:{}", self.protocol, self.address, self.port)
        }
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url())
    }
}

fn parse_directive(tokens: &[&str]) -> Option<NetworkAddress> {
    let value = tokens.get(1)?;
    let mut parsed = if let Ok(port) = value.parse::<u16>() {
        NetworkAddress::with_port(port)
    } else {
        let caps = ADDRESS_PORT.captures(value)?;
        let port = caps[2].parse::<u16>().ok()?;
        let address = match &caps[1] {
            "0.0.0.0" => "127.0.0.1",
            "[::]" => "[::1]",
            other => other,
        };
        NetworkAddress {
            address: address.to_string(),
            ..NetworkAddress::with_port(port)
        }
    };
    if let Some(protocol) = tokens.get(2) {
        parsed.protocol = protocol.to_string();
    }
    Some(parsed)
}

/// 解析所有 `Listen` 指令，按出现顺序返回
pub fn listen_addresses(ports_config: &Path) -> Result<Vec<NetworkAddress>> {
    log::debug!(
        "Discovering where Apache is listening by parsing {} ..",
        ports_config.display()
    );
    let error = |message: String| MonitorError::AddressDiscovery {
        path: ports_config.to_path_buf(),
        message,
    };

    if !ports_config.is_file() {
        return Err(error(
            "the configuration file is missing, is Apache properly installed?".to_string(),
        ));
    }
    let contents = fs::read_to_string(ports_config).map_err(|e| error(e.to_string()))?;

    let mut addresses = Vec::new();
    for (lnum, line) in contents.lines().enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < 2 || tokens[0] != "Listen" {
            continue;
        }
        match parse_directive(&tokens) {
            Some(address) => {
                log::debug!("Parsed listen directive on line {}: {}", lnum + 1, address);
                addresses.push(address);
            }
            None => log::warn!(
                "Failed to parse listen directive on line {}: {}",
                lnum + 1,
                line.trim()
            ),
        }
    }

    if addresses.is_empty() {
        return Err(error("no Listen directives found".to_string()));
    }
    Ok(addresses)
}

/// 第一个监听地址对应的基础 URL
pub fn discover_base_url(ports_config: &Path) -> Result<String> {
    let addresses = listen_addresses(ports_config)?;
    Ok(addresses[0].url())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn ports_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_missing_file() {
        let result = listen_addresses(Path::new("/nonexistent/ports.conf"));
        assert!(matches!(result, Err(MonitorError::AddressDiscovery { .. })));
    }

    #[test]
    fn test_no_directives() {
        let file = ports_file("# nothing here\n<IfModule ssl_module>\n</IfModule>\n");
        assert!(listen_addresses(file.path()).is_err());
    }

    #[test]
    fn test_port_only() {
        let file = ports_file("Listen 12345\n");
        let addresses = listen_addresses(file.path()).unwrap();
        assert_eq!(addresses, vec![NetworkAddress::with_port(12345)]);
        assert_eq!(addresses[0].url(), "http://127.0.0.1:12345");
    }

    #[test]
    fn test_debian_ports_conf() {
        let file = ports_file(
            "# If you just change the port or add more ports here\n\
             Listen 0.0.0.0:80\n\
             <IfModule ssl_module>\n\
             \tListen 443\n\
             </IfModule>\n\
             Listen 127.0.0.2:54321\n\
             Listen [::]:8443 https\n\
             Listen garbage\n",
        );
        let addresses = listen_addresses(file.path()).unwrap();
        let urls: Vec<String> = addresses.iter().map(|a| a.url()).collect();
        assert_eq!(
            urls,
            vec![
                "http://127.0.0.1",
                "https://127.0.0.1",
                "http://127.0.0.2:54321",
                "https://[::1]:8443",
            ]
        );
        assert_eq!(discover_base_url(file.path()).unwrap(), "http://127.0.0.1");
    }
}
