//! nmap XML report decoding and the condensed text summary.
//!
//! [`parse`] is lenient about missing attributes (they become `None`) but
//! strict about the document itself: it must be well-formed XML rooted at
//! `<nmaprun>`. [`summarize`] needs a handful of fields to be present and
//! falls back to [`UNFORMATTABLE_NOTICE`] otherwise.
use roxmltree::{Document, Node, ParsingOptions};

use crate::error::ParseError;
use crate::types::{HostEntry, PortEntry, ScanResult};

pub const UNFORMATTABLE_NOTICE: &str =
    "Scan completed, but the results could not be formatted. See the structured result for details.";

const ROOT_TAG: &str = "nmaprun";

/// Decode nmap's `-oX` output into a [`ScanResult`].
pub fn parse(xml: &str) -> Result<ScanResult, ParseError> {
    // nmap emits `<!DOCTYPE nmaprun>`, which roxmltree refuses by default.
    let opts = ParsingOptions {
        allow_dtd: true,
        ..ParsingOptions::default()
    };
    let doc = Document::parse_with_options(xml, opts)
        .map_err(|e| ParseError::MalformedOutput(e.to_string()))?;

    let root = doc.root_element();
    if !root.has_tag_name(ROOT_TAG) {
        return Err(ParseError::MalformedOutput(format!(
            "expected <{ROOT_TAG}> root element, found <{}>",
            root.tag_name().name()
        )));
    }

    let finished = child(root, "runstats").and_then(|r| child(r, "finished"));
    let host_counts = child(root, "runstats").and_then(|r| child(r, "hosts"));

    Ok(ScanResult {
        scanner: attr(root, "scanner"),
        version: attr(root, "version"),
        args: attr(root, "args"),
        start_time: attr(root, "startstr"),
        finish_time: finished.and_then(|f| attr(f, "timestr")),
        elapsed_secs: finished.and_then(|f| f.attribute("elapsed")?.parse().ok()),
        hosts_up: host_counts.and_then(|h| h.attribute("up")?.parse().ok()),
        hosts_down: host_counts.and_then(|h| h.attribute("down")?.parse().ok()),
        hosts: children(root, "host").map(parse_host).collect(),
    })
}

fn parse_host(host: Node) -> HostEntry {
    // Prefer the IP address over a MAC address when both are reported.
    let addresses: Vec<Node> = children(host, "address").collect();
    let address = addresses
        .iter()
        .find(|a| matches!(a.attribute("addrtype"), Some("ipv4" | "ipv6")))
        .or_else(|| addresses.first());

    let hostnames: Vec<Node> = child(host, "hostnames")
        .map(|h| children(h, "hostname").collect())
        .unwrap_or_default();
    let hostname = hostnames
        .iter()
        .find(|h| h.attribute("type") == Some("user"))
        .or_else(|| hostnames.first())
        .and_then(|h| attr(*h, "name"));

    let ports = child(host, "ports")
        .map(|p| children(p, "port").map(parse_port).collect())
        .unwrap_or_default();

    HostEntry {
        address: address.and_then(|a| attr(*a, "addr")),
        address_type: address.and_then(|a| attr(*a, "addrtype")),
        hostname,
        state: child(host, "status").and_then(|s| attr(s, "state")),
        ports,
    }
}

fn parse_port(port: Node) -> PortEntry {
    let service = child(port, "service");
    PortEntry {
        port: port.attribute("portid").and_then(|p| p.parse().ok()),
        protocol: attr(port, "protocol"),
        state: child(port, "state").and_then(|s| attr(s, "state")),
        service: service.and_then(|s| attr(s, "name")),
        product: service.and_then(|s| attr(s, "product")),
        version: service.and_then(|s| attr(s, "version")),
    }
}

fn child<'a, 'i>(node: Node<'a, 'i>, tag: &str) -> Option<Node<'a, 'i>> {
    node.children().find(|n| n.has_tag_name(tag))
}

fn children<'a, 'i: 'a>(node: Node<'a, 'i>, tag: &'a str) -> impl Iterator<Item = Node<'a, 'i>> + 'a {
    node.children().filter(move |n| n.has_tag_name(tag))
}

fn attr(node: Node, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}

/// Render the open-port overview of a scan.
///
/// Closed and filtered ports are left out; they stay available in the
/// [`ScanResult`] itself.
pub fn summarize(scan: &ScanResult) -> String {
    try_summarize(scan).unwrap_or_else(|| UNFORMATTABLE_NOTICE.to_string())
}

fn try_summarize(scan: &ScanResult) -> Option<String> {
    let mut lines = vec![format!("Scan started: {}", scan.start_time.as_deref()?)];

    if scan.hosts.is_empty() {
        lines.push("No hosts found.".to_string());
    }
    for host in &scan.hosts {
        let address = host.address.as_deref()?;
        match host.hostname.as_deref() {
            Some(name) => lines.push(format!("Host: {address} ({name})")),
            None => lines.push(format!("Host: {address}")),
        }
        lines.push(format!("State: {}", host.state.as_deref().unwrap_or("unknown")));
        for port in host.ports.iter().filter(|p| p.is_open()) {
            lines.push(format!(
                "{}/{} - {}",
                port.port?,
                port.protocol.as_deref()?,
                port.service.as_deref().unwrap_or("unknown")
            ));
        }
    }

    lines.push(format!("Scan finished: {}", scan.finish_time.as_deref()?));
    Some(lines.join("\n"))
}
