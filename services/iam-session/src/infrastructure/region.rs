//! 本地地区解析

use std::net::IpAddr;

use async_trait::async_trait;
use iam_ports::RegionResolver;

/// 内网地址标记为 `LAN`，公网地址不解析
#[derive(Debug, Clone, Default)]
pub struct LocalRegionResolver;

pub const LAN_REGION: &str = "LAN";

fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_loopback() || v4.is_private() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_internal(IpAddr::V4(v4));
            }
            let first = v6.segments()[0];
            // fc00::/7 唯一本地地址，fe80::/10 链路本地地址
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

#[async_trait]
impl RegionResolver for LocalRegionResolver {
    async fn resolve(&self, ip: &str) -> Option<String> {
        let ip: IpAddr = ip.trim().parse().ok()?;
        is_internal(ip).then(|| LAN_REGION.to_string())
    }
}
