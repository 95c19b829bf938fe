//! Network interface enumeration for the advertised-URL triplet described
//! in spec.md §4.6/§6. Grounded on the `local-ip-address` crate, the one
//! dependency in the retrieval pack (`aptove-bridge`, in `other_examples`)
//! that carries this exact local-network-discovery concern.

use std::net::Ipv4Addr;

use local_ip_address::list_afinet_netifas;

/// The three URLs computed at startup: a primary (prefer LAN, then mesh,
/// else loopback), plus the LAN and mesh URLs individually (`None` if no
/// interface of that kind exists).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisedUrls {
    pub primary: String,
    pub lan: Option<String>,
    pub mesh: Option<String>,
}

/// Address categories per spec.md §4.6: `100.*` is a Tailscale mesh
/// overlay, `172.*` is a Docker bridge and is ignored entirely, anything
/// else non-loopback is treated as local LAN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddrClass {
    Lan,
    Mesh,
    Ignored,
}

fn classify(addr: &Ipv4Addr) -> AddrClass {
    if addr.octets()[0] == 100 {
        AddrClass::Mesh
    } else if addr.octets()[0] == 172 {
        AddrClass::Ignored
    } else {
        AddrClass::Lan
    }
}

fn url_for(ip: &str, port: u16, token: &str) -> String {
    format!("http://{ip}:{port}?token={token}")
}

/// Enumerate non-loopback IPv4 interfaces and build the advertised-URL
/// triplet. The first interface of each category wins; enumeration
/// failures (no network access) degrade to a loopback-only primary URL.
pub fn advertised_urls(port: u16, token: &str) -> AdvertisedUrls {
    let mut lan_ip: Option<Ipv4Addr> = None;
    let mut mesh_ip: Option<Ipv4Addr> = None;

    if let Ok(interfaces) = list_afinet_netifas() {
        for (_name, addr) in interfaces {
            let std::net::IpAddr::V4(v4) = addr else { continue };
            if v4.is_loopback() {
                continue;
            }
            match classify(&v4) {
                AddrClass::Lan if lan_ip.is_none() => lan_ip = Some(v4),
                AddrClass::Mesh if mesh_ip.is_none() => mesh_ip = Some(v4),
                _ => {}
            }
        }
    }

    let lan = lan_ip.map(|ip| url_for(&ip.to_string(), port, token));
    let mesh = mesh_ip.map(|ip| url_for(&ip.to_string(), port, token));
    let primary = lan
        .clone()
        .or_else(|| mesh.clone())
        .unwrap_or_else(|| url_for("127.0.0.1", port, token));

    AdvertisedUrls { primary, lan, mesh }
}
