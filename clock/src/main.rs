#[cfg(feature = "esp32")]
mod esp;
#[cfg(not(feature = "esp32"))]
mod host;
#[cfg_attr(not(feature = "esp32"), allow(dead_code))]
mod pcal6416a;
#[cfg_attr(not(feature = "esp32"), allow(dead_code))]
mod pcf85063;
#[cfg_attr(not(feature = "esp32"), allow(dead_code))]
mod tps65186;

#[cfg(not(feature = "esp32"))]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    host::run().await
}

#[cfg(feature = "esp32")]
fn main() -> anyhow::Result<()> {
    esp::run()
}
