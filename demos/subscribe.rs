use futures::StreamExt;
use log::*;

use netconf_xpath::{Client, ConnectParams, SubscriptionTarget};

#[tokio::main]
async fn main() -> Result<(), netconf_xpath::Error> {
    env_logger::init();
    let mut args = std::env::args();
    args.next();
    let host = args.next().expect("usage: subscribe <host> [stream]");
    let stream = args.next().unwrap_or_else(|| "NETCONF".to_owned());
    let mut client = Client::new(ConnectParams::new(host, "admin", "admin"));
    let mut events = client
        .subscription(SubscriptionTarget::Stream(stream))
        .await?;
    while let Some(event) = events.next().await {
        let envelope = event?;
        info!("event: {}", envelope.xml);
    }
    client.close().await
}
