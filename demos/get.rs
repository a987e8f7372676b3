use log::*;

use netconf_xpath::{Client, ConnectParams};

#[tokio::main]
async fn main() -> Result<(), netconf_xpath::Error> {
    env_logger::init();
    let mut args = std::env::args();
    args.next();
    let host = args.next().expect("usage: get <host> [xpath]");
    let xpath = args.next().unwrap_or_else(|| "/".to_owned());
    info!("connecting to {}", host);
    let mut client = Client::new(ConnectParams::new(host, "admin", "admin"));
    let envelope = client.get_data(&xpath, None).await?;
    println!("{}", serde_json::to_string_pretty(&envelope.result).unwrap());
    client.close().await
}
