/// Smoke-test for `ReqwestTransport` + `HtmlListingParser`.
///
/// Fetches one page through a resilient client and prints the candidate
/// listings the parser finds on it.
///
/// Run with:
///   cargo run --example page_smoke -- https://business.gov.au/grants-and-programs
use fundscout_client::{HtmlListingParser, ReqwestTransport};
use fundscout_core::allowlist::DomainAllowList;
use fundscout_core::client::{ClientSettings, ResilientClient};
use fundscout_core::traits::PageParser;
use url::Url;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let target = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://business.gov.au/grants-and-programs".to_string());
    let url = Url::parse(&target)?;
    let host = url
        .host_str()
        .ok_or_else(|| anyhow::anyhow!("URL has no host"))?
        .to_string();

    let allow_list = DomainAllowList::new([host.as_str()]);
    let transport = ReqwestTransport::new("Fundscout/0.1 (smoke test)", allow_list.clone())?;
    let client = ResilientClient::new("smoke", &target, transport, ClientSettings::new(allow_list));

    println!("Fetching {target} …");
    let response = client.get("", &[]).await?;
    println!("HTTP {} ({} bytes)", response.status, response.body.len());

    let parser = HtmlListingParser::new()?;
    let listings = parser.parse(&response.body, &target)?;
    for listing in listings.iter().flatten() {
        println!("- {} <{}>", listing.title, listing.source_url);
        if let Some(amount) = &listing.amount_text {
            println!("    amount: {amount}");
        }
    }
    println!(
        "OK: {} candidates, {} unreadable",
        listings.iter().filter(|l| l.is_ok()).count(),
        listings.iter().filter(|l| l.is_err()).count()
    );
    Ok(())
}
