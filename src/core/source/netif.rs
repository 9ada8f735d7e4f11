//! OS network interface enumeration.
//!
//! A thin wrapper over `getifaddrs(3)`. One [`Netif`] is produced per
//! interface name, aggregating every address the kernel reports for it.

use std::collections::HashMap;
use std::io;
use std::net::IpAddr;

/// Snapshot of one OS network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Netif {
    pub name: String,
    pub addrs: Vec<IpAddr>,
    pub up: bool,
    pub loopback: bool,
}

/// Enumerate the OS interface table. Interfaces are returned in
/// first-seen kernel order so repeated probes diff deterministically.
#[cfg(unix)]
pub fn probe() -> io::Result<Vec<Netif>> {
    use std::ffi::CStr;
    use std::net::{Ipv4Addr, Ipv6Addr};

    let mut ifap: *mut libc::ifaddrs = std::ptr::null_mut();
    // SAFETY: getifaddrs fills ifap with a list owned by libc; it is
    // released below with freeifaddrs and never used after that.
    if unsafe { libc::getifaddrs(&mut ifap) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut order: Vec<String> = Vec::new();
    let mut table: HashMap<String, Netif> = HashMap::new();

    let mut cursor = ifap;
    while !cursor.is_null() {
        // SAFETY: cursor walks the linked list returned by getifaddrs;
        // every node is valid until freeifaddrs.
        let entry = unsafe { &*cursor };
        cursor = entry.ifa_next;

        let name = unsafe { CStr::from_ptr(entry.ifa_name) }
            .to_string_lossy()
            .into_owned();
        let flags = entry.ifa_flags;

        let netif = table.entry(name.clone()).or_insert_with(|| {
            order.push(name.clone());
            Netif {
                name,
                addrs: Vec::new(),
                up: flags & (libc::IFF_UP as libc::c_uint) != 0,
                loopback: flags & (libc::IFF_LOOPBACK as libc::c_uint) != 0,
            }
        });

        if entry.ifa_addr.is_null() {
            continue;
        }
        // SAFETY: ifa_addr points at a sockaddr whose sa_family tells us
        // the concrete layout to read.
        let family = unsafe { (*entry.ifa_addr).sa_family };
        match family as libc::c_int {
            libc::AF_INET => {
                let sa = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in) };
                let octets = u32::from_be(sa.sin_addr.s_addr);
                netif.addrs.push(IpAddr::V4(Ipv4Addr::from(octets)));
            }
            libc::AF_INET6 => {
                let sa = unsafe { &*(entry.ifa_addr as *const libc::sockaddr_in6) };
                netif.addrs.push(IpAddr::V6(Ipv6Addr::from(sa.sin6_addr.s6_addr)));
            }
            _ => {}
        }
    }

    // SAFETY: ifap came from getifaddrs above and is freed exactly once.
    unsafe { libc::freeifaddrs(ifap) };

    Ok(order
        .into_iter()
        .filter_map(|name| table.remove(&name))
        .collect())
}

#[cfg(not(unix))]
pub fn probe() -> io::Result<Vec<Netif>> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interface enumeration is only supported on unix",
    ))
}
