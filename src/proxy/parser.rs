//! Listing page parser for extracting proxy rows, the country filter and pagination

use crate::proxy::models::{CountryDirectory, ProxyRecord};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Option value of the "all countries" pseudo-entry
const ALL_COUNTRIES: &str = "all";

static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("#proxy_list tbody tr"));
static AD_CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("td[colspan]"));
static IP_SCRIPT_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("td:nth-child(1) script"));
static PORT_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("td:nth-child(2) .fport"));
static TYPE_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("td:nth-child(3) small"));
static COUNTRY_CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("td:nth-child(4)"));
static REGION_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("td:nth-child(5) small"));
static CITY_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("td:nth-child(6) small"));
static ANONYMITY_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("td:nth-child(7) small"));
static UPTIME_SELECTOR: Lazy<Selector> = Lazy::new(|| selector("td:nth-child(9) small"));
static COUNTRY_OPTION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| selector("#frmsearchFilter-country option"));
static PAGINATOR_LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| selector(".paginator a"));

/// The IP column hides the address behind `Base64.decode("...")`
static BASE64_IP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"Base64\.decode\("(.+?)"\)"#).expect("Invalid Base64 script regex")
});

/// Trailing `(123)` count in a country option label
static COUNT_SUFFIX_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\((\d+)\)$").expect("Invalid count suffix regex"));

fn selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("Invalid selector {css}: {e:?}"))
}

/// Everything the harvester needs from one listing page
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    /// Proxy rows in page order
    pub proxies: Vec<ProxyRecord>,
    /// Country filter options; only consulted on the very first page of a harvest
    pub countries: CountryDirectory,
    /// Total number of pages announced by the paginator
    pub total_pages: u32,
}

/// Parser for the proxy listing markup
pub struct ListingParser;

impl ListingParser {
    /// Parse a full listing page
    pub fn parse(html: &str) -> ListingPage {
        let document = Html::parse_document(html);

        ListingPage {
            proxies: Self::extract_proxies(&document),
            countries: Self::extract_countries(&document),
            total_pages: Self::total_pages(&document),
        }
    }

    /// Extract proxy rows, skipping advertisement rows and rows without a decodable IP
    pub fn extract_proxies(document: &Html) -> Vec<ProxyRecord> {
        document
            .select(&ROW_SELECTOR)
            .filter(|row| row.select(&AD_CELL_SELECTOR).next().is_none())
            .filter_map(Self::parse_row)
            .collect()
    }

    fn parse_row(row: ElementRef<'_>) -> Option<ProxyRecord> {
        let script = select_text(row, &IP_SCRIPT_SELECTOR);
        let encoded = BASE64_IP_REGEX.captures(&script)?.get(1)?.as_str();
        let ip = decode_base64(encoded)?;

        let port = select_text(row, &PORT_SELECTOR);
        let port = port.trim();
        if port.is_empty() {
            return None;
        }

        let country = select_text(row, &COUNTRY_CELL_SELECTOR);
        let region = select_text(row, &REGION_SELECTOR);
        let city = select_text(row, &CITY_SELECTOR);

        Some(ProxyRecord {
            anonymity_level: select_text(row, &ANONYMITY_SELECTOR),
            region: format!("{} {} {}", country.trim(), region, city)
                .trim()
                .to_string(),
            proxy_type: select_text(row, &TYPE_SELECTOR),
            uptime: select_text(row, &UPTIME_SELECTOR),
            address: format!("{}:{}", ip.trim(), port),
        })
    }

    /// Extract the country filter options as a directory
    pub fn extract_countries(document: &Html) -> CountryDirectory {
        let mut directory = CountryDirectory::new();

        for option in document.select(&COUNTRY_OPTION_SELECTOR) {
            let Some(code) = option.value().attr("value") else {
                continue;
            };
            if code == ALL_COUNTRIES {
                continue;
            }

            let label: String = option.text().collect();
            let label = label.trim_end();
            let count = COUNT_SUFFIX_REGEX
                .captures(label)
                .and_then(|caps| caps.get(1))
                .map_or("0", |m| m.as_str());
            let name = COUNT_SUFFIX_REGEX.replace(label, "");

            directory.insert(name.trim(), code, count);
        }

        directory
    }

    /// Total page count: the numeric tail of the last non-"Next" paginator link.
    ///
    /// No link, or a link without a numeric tail, means a single page.
    pub fn total_pages(document: &Html) -> u32 {
        document
            .select(&PAGINATOR_LINK_SELECTOR)
            .filter(|link| !link.text().collect::<String>().contains("Next"))
            .last()
            .and_then(|link| link.value().attr("href"))
            .and_then(|href| href.trim_end_matches('/').rsplit('/').next())
            .and_then(|tail| tail.parse::<u32>().ok())
            .filter(|&pages| pages > 0)
            .unwrap_or(1)
    }
}

fn select_text(row: ElementRef<'_>, selector: &Selector) -> String {
    row.select(selector)
        .flat_map(|el| el.text())
        .collect::<String>()
}

fn decode_base64(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded).ok()?;
    let ip = String::from_utf8(bytes).ok()?;
    (!ip.trim().is_empty()).then_some(ip)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn row(ip_b64: &str, port: &str, country: &str, city: &str) -> String {
        format!(
            r#"<tr>
                <td><script>document.write(Base64.decode("{ip_b64}"))</script></td>
                <td><span class="fport">{port}</span></td>
                <td><small>SOCKS5</small></td>
                <td> {country} </td>
                <td><small>Region</small></td>
                <td><small>{city}</small></td>
                <td><small>High anonymity</small></td>
                <td><small>1.2 s</small></td>
                <td><small>95%</small></td>
            </tr>"#
        )
    }

    /// Build a listing page with the given rows, country options and paginator links
    pub(crate) fn listing_html(rows: &[String], options: &[(&str, &str)], pages: &[&str]) -> String {
        let options: String = options
            .iter()
            .map(|(value, text)| format!(r#"<option value="{value}">{text}</option>"#))
            .collect();
        let links: String = pages
            .iter()
            .map(|href| {
                let text = if href.ends_with("next") { "Next &raquo;" } else { href.rsplit('/').next().unwrap_or("") };
                format!(r#"<a href="{href}">{text}</a>"#)
            })
            .collect();
        format!(
            r#"<html><body>
            <form><select id="frmsearchFilter-country">{options}</select></form>
            <table id="proxy_list"><thead><tr><th>IP</th></tr></thead>
            <tbody>{}</tbody></table>
            <div class="paginator">{links}</div>
            </body></html>"#,
            rows.concat()
        )
    }

    pub(crate) fn proxy_row(ip: &str, port: &str) -> String {
        row(&STANDARD.encode(ip), port, "China", "Beijing")
    }

    #[test]
    fn test_extract_proxy_rows() {
        let html = listing_html(
            &[
                row("MS4yLjMuNA==", "1080", "United States", "Dallas"),
                proxy_row("5.6.7.8", "9050"),
            ],
            &[],
            &[],
        );
        let page = ListingParser::parse(&html);
        assert_eq!(page.proxies.len(), 2);

        let first = &page.proxies[0];
        assert_eq!(first.address, "1.2.3.4:1080");
        assert_eq!(first.proxy_type, "SOCKS5");
        assert_eq!(first.region, "United States Region Dallas");
        assert_eq!(first.anonymity_level, "High anonymity");
        assert_eq!(first.uptime, "95%");
        assert_eq!(page.proxies[1].address, "5.6.7.8:9050");
    }

    #[test]
    fn test_skip_ad_and_broken_rows() {
        let rows = vec![
            r#"<tr><td colspan="11">Advertisement</td></tr>"#.to_string(),
            row("not base64!!", "1080", "X", "Y"),
            r#"<tr><td>plain</td><td><span class="fport">80</span></td></tr>"#.to_string(),
            proxy_row("9.9.9.9", ""),
            proxy_row("8.8.8.8", "1080"),
        ];
        let page = ListingParser::parse(&listing_html(&rows, &[], &[]));
        assert_eq!(page.proxies.len(), 1);
        assert_eq!(page.proxies[0].address, "8.8.8.8:1080");
    }

    #[test]
    fn test_extract_countries() {
        let html = listing_html(
            &[],
            &[
                ("all", "All countries"),
                ("CN", "China (1520)"),
                ("US", "United States (87)"),
                ("XK", "Kosovo"),
            ],
            &[],
        );
        let page = ListingParser::parse(&html);
        let entries: Vec<_> = page.countries.iter().collect();
        assert_eq!(
            entries,
            vec![
                ("China/CN", "1520"),
                ("United States/US", "87"),
                ("Kosovo/XK", "0"),
            ]
        );
    }

    #[test]
    fn test_total_pages() {
        let base = "/en/proxylist/country/US/socks5/uptime/all";
        let html = listing_html(
            &[],
            &[],
            &[
                &format!("{base}/2"),
                &format!("{base}/3"),
                &format!("{base}/7"),
                &format!("{base}/next"),
            ],
        );
        assert_eq!(ListingParser::parse(&html).total_pages, 7);
    }

    #[test]
    fn test_total_pages_defaults_to_one() {
        assert_eq!(ListingParser::parse(&listing_html(&[], &[], &[])).total_pages, 1);

        let html = listing_html(&[], &[], &["/en/proxylist/country/US/socks5/uptime/all/oops"]);
        assert_eq!(ListingParser::parse(&html).total_pages, 1);
    }
}
