//! Proxy auto-config (PAC) generator: renders a fixed `FindProxyForURL`
//! JavaScript template, plain `format!` string templating — no
//! template-engine crate.
use crate::policy::PolicyTable;

/// Renders a PAC script that routes every policy-table host (and its
/// suffixes, to `subdomain_depth`) through `socks_addr`, and everything
/// else direct.
pub fn render(table: &PolicyTable, socks_addr: &str) -> String {
    let mut hosts = String::new();
    for key in table.keys() {
        hosts.push_str(&format!("    \"{key}\": 1,\n"));
    }

    format!(
        r#"var proxyHosts = {{
{hosts}}};

var subdomainDepth = {depth};

function FindProxyForURL(url, host) {{
    if (proxyHosts[host]) {{
        return "SOCKS5 {socks}";
    }}

    var parts = host.split(".");
    for (var i = 1; i <= subdomainDepth && i < parts.length; i++) {{
        var suffix = "." + parts.slice(i).join(".");
        if (proxyHosts[suffix]) {{
            return "SOCKS5 {socks}";
        }}
    }}

    return "DIRECT";
}}
"#,
        hosts = hosts,
        depth = table.subdomain_depth,
        socks = socks_addr,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use crate::policy::Config;

    #[test]
    fn renders_one_line_per_key() {
        let mut table = PolicyTable::new();
        table.insert_host(
            "example.com",
            Config {
                options: Options::TTL,
                ..Default::default()
            },
        );
        table.insert_host(
            ".co.uk",
            Config {
                options: Options::TTL,
                ..Default::default()
            },
        );

        let pac = render(&table, "127.0.0.1:1080");
        assert!(pac.contains("\"example.com\": 1,"));
        assert!(pac.contains("\".co.uk\": 1,"));
        assert!(pac.contains("SOCKS5 127.0.0.1:1080"));
        assert!(pac.contains("function FindProxyForURL"));
    }

    #[test]
    fn embeds_current_subdomain_depth() {
        let mut table = PolicyTable::new();
        table.subdomain_depth = 3;
        let pac = render(&table, "127.0.0.1:1080");
        assert!(pac.contains("var subdomainDepth = 3;"));
    }
}
