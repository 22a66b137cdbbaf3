// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Host and process identity carried at the top of every metrics message.

use bson::{Bson, Document};
use nix::ifaddrs::getifaddrs;
use nix::net::if_::InterfaceFlags;
use regex::Regex;
use std::env;
use std::fs::File;
use std::io::{self, BufRead};
use std::net::{SocketAddrV4, SocketAddrV6};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

pub const PROC_SELF_CGROUP_PATH: &str = "/proc/self/cgroup";
/// Every virtual network interface (bridges, veth pairs, tunnels) has an
/// entry here
pub const VIRTUAL_NET_PATH: &str = "/sys/devices/virtual/net";

const REDHAT_RELEASE: &str = "etc/redhat-release";
const AMAZON_RELEASE_CPE: &str = "etc/release-cpe";
const UBUNTU_LSB_RELEASE: &str = "etc/lsb-release";
const DEBIAN_VERSION: &str = "etc/debian_version";
const OTHER_RELEASE_FILES: [&str; 4] = [
    "etc/SuSE-release",
    "etc/slackware-version",
    "etc/gentoo-release",
    "etc/issue",
];
const UNKNOWN_DISTRO: &str = "Unknown";

const CONTAINER_KEYWORDS: [&str; 3] = ["/docker/", "/ecs/", "/kubepods/"];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostId {
    pub hostname: String,
    /// Hostname alias configured by the user
    pub configured_hostname: Option<String>,
    pub uname_sysname: String,
    pub uname_release: String,
    pub pid: i32,
    pub distro: String,
    pub ip_addresses: Vec<String>,
    pub mac_addresses: Vec<String>,
    pub ec2_instance_id: Option<String>,
    pub ec2_availability_zone: Option<String>,
    pub docker_container_id: Option<String>,
}

impl HostId {
    /// Detects the identity of the current host.
    ///
    /// Every lookup is best-effort: a failing source leaves its field empty.
    /// EC2 metadata needs network access and is left for the caller to fill.
    #[must_use]
    pub fn detect(configured_hostname: Option<String>) -> Self {
        let (uname_sysname, uname_release) = uname();
        let (ip_addresses, mac_addresses) = interface_addresses(Path::new(VIRTUAL_NET_PATH));
        Self {
            hostname: get_hostname(),
            configured_hostname: configured_hostname.filter(|alias| !alias.is_empty()),
            uname_sysname,
            uname_release,
            pid: i32::try_from(std::process::id()).unwrap_or(i32::MAX),
            distro: detect_distro(Path::new("/")),
            ip_addresses,
            mac_addresses,
            ec2_instance_id: None,
            ec2_availability_zone: None,
            docker_container_id: get_container_id(PROC_SELF_CGROUP_PATH),
        }
    }

    /// Appends the identity fields to `doc` in wire order.
    pub(crate) fn append_to(&self, doc: &mut Document) {
        doc.insert("Hostname", self.hostname.as_str());
        if let Some(alias) = &self.configured_hostname {
            doc.insert("ConfiguredHostname", alias.as_str());
        }
        doc.insert("UnameSysName", self.uname_sysname.as_str());
        doc.insert("UnameVersion", self.uname_release.as_str());
        doc.insert("PID", self.pid);
        doc.insert("Distro", self.distro.as_str());
        if !self.ip_addresses.is_empty() {
            doc.insert("IPAddresses", string_array(&self.ip_addresses));
        }
        doc.insert("MACAddresses", string_array(&self.mac_addresses));
        if let Some(id) = &self.ec2_instance_id {
            doc.insert("EC2InstanceID", id.as_str());
        }
        if let Some(zone) = &self.ec2_availability_zone {
            doc.insert("EC2AvailabilityZone", zone.as_str());
        }
        if let Some(id) = &self.docker_container_id {
            doc.insert("DockerContainerID", id.as_str());
        }
    }
}

fn string_array(values: &[String]) -> Bson {
    Bson::Array(values.iter().map(|v| Bson::String(v.clone())).collect())
}

/// Get the system hostname
///
/// 1. HOSTNAME environment variable
/// 2. System hostname via nix::unistd::gethostname()
/// 3. Fallback to "unknown"
#[must_use]
pub fn get_hostname() -> String {
    if let Ok(hostname) = env::var("HOSTNAME") {
        if !hostname.is_empty() {
            return hostname;
        }
    }

    match nix::unistd::gethostname() {
        Ok(hostname) => {
            if let Some(hostname) = hostname.to_str().filter(|h| !h.is_empty()) {
                return hostname.to_string();
            }
        }
        Err(e) => warn!("Failed to get system hostname: {}", e),
    }

    warn!("Could not determine hostname, using 'unknown'");
    "unknown".to_string()
}

fn uname() -> (String, String) {
    match nix::sys::utsname::uname() {
        Ok(info) => (
            info.sysname().to_string_lossy().into_owned(),
            info.release().to_string_lossy().into_owned(),
        ),
        Err(e) => {
            debug!("Failed to read uname: {e}");
            (String::new(), String::new())
        }
    }
}

/// True unless `name` is listed as a virtual interface under `virtual_net`.
fn is_physical_interface(virtual_net: &Path, name: &str) -> bool {
    !name.is_empty() && !virtual_net.join(name).exists()
}

/// Unicast addresses and hardware addresses of the physical interfaces,
/// skipping loopback and point-to-point links.
fn interface_addresses(virtual_net: &Path) -> (Vec<String>, Vec<String>) {
    let mut ips = Vec::new();
    let mut macs: Vec<String> = Vec::new();

    let interfaces = match getifaddrs() {
        Ok(interfaces) => interfaces,
        Err(e) => {
            debug!("Failed to list network interfaces: {e}");
            return (ips, macs);
        }
    };

    for interface in interfaces {
        if interface
            .flags
            .intersects(InterfaceFlags::IFF_LOOPBACK | InterfaceFlags::IFF_POINTOPOINT)
            || !is_physical_interface(virtual_net, &interface.interface_name)
        {
            continue;
        }
        let Some(address) = interface.address else {
            continue;
        };
        if let Some(v4) = address.as_sockaddr_in() {
            ips.push(SocketAddrV4::from(*v4).ip().to_string());
        } else if let Some(v6) = address.as_sockaddr_in6() {
            ips.push(SocketAddrV6::from(*v6).ip().to_string());
        } else if let Some(mac) = address
            .as_link_addr()
            .and_then(|link| link.addr())
            .filter(|bytes| bytes.iter().any(|b| *b != 0))
        {
            let mac = format_mac(&mac);
            if !macs.contains(&mac) {
                macs.push(mac);
            }
        }
    }

    (ips, macs)
}

fn format_mac(bytes: &[u8; 6]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// First line of `path` containing `keyword`, trimmed. An empty keyword
/// matches the first non-empty line.
fn line_with_keyword(path: &Path, keyword: &str) -> Option<String> {
    let reader = io::BufReader::new(File::open(path).ok()?);
    reader
        .lines()
        .map_while(Result::ok)
        .map(|line| line.trim().to_string())
        .find(|line| !line.is_empty() && line.contains(keyword))
}

/// Name of the Linux distribution installed under `root`.
///
/// Some distributions ship several of these files, so they are checked in a
/// fixed order: Red Hat family, Amazon Linux, Ubuntu, then the rest.
pub fn detect_distro(root: &Path) -> String {
    if let Some(line) = line_with_keyword(&root.join(REDHAT_RELEASE), "") {
        return line;
    }

    if let Some(line) = line_with_keyword(&root.join(AMAZON_RELEASE_CPE), "") {
        if let Some(version) = line.rsplit(':').next().filter(|v| !v.is_empty()) {
            return format!("Amzn Linux {version}");
        }
    }

    if let Some(line) = line_with_keyword(&root.join(UBUNTU_LSB_RELEASE), "DISTRIB_DESCRIPTION") {
        let description = line.rsplit('=').next().unwrap_or_default().trim_matches('"');
        if description.is_empty() {
            return "Ubuntu unknown".to_string();
        }
        return description.to_string();
    }

    if let Some(line) = line_with_keyword(&root.join(DEBIAN_VERSION), "") {
        return format!("Debian {line}");
    }

    OTHER_RELEASE_FILES
        .iter()
        .find_map(|file| line_with_keyword(&root.join(file), ""))
        .unwrap_or_else(|| UNKNOWN_DISTRO.to_string())
}

fn container_id_regex() -> Option<&'static Regex> {
    static CONTAINER_ID: OnceLock<Option<Regex>> = OnceLock::new();
    CONTAINER_ID
        .get_or_init(|| Regex::new(r"^[0-9a-f]{64}$").ok())
        .as_ref()
}

/// Container id found in the cgroup file at `path`, if the process runs in a
/// container.
pub fn get_container_id(path: &str) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => container_id_from_cgroup(&contents),
        Err(e) => {
            debug!("Could not read {path}: {e}");
            None
        }
    }
}

/// Extracts the container id from the contents of `/proc/self/cgroup`.
///
/// A typical line looks like
/// `9:devices:/docker/40188af19439697187e3f60b933e7e37c5c41035f4c0b266a51c86c5a0074b25`.
pub fn container_id_from_cgroup(contents: &str) -> Option<String> {
    let line = CONTAINER_KEYWORDS
        .iter()
        .find_map(|keyword| contents.lines().find(|line| line.contains(keyword)))?;
    let regex = container_id_regex()?;
    line.split('/')
        .find(|token| regex.is_match(token))
        .map(str::to_string)
}
