use argh::FromArgs;
use weather_producer::{
    shutdown, zenoh_session, ConfigError, PollingLoop, ProducerConfig, Settings, WeatherApiClient,
    ZenohPublisher,
};

#[derive(FromArgs)]
/// Fetch realtime weather for a location and publish it to a Zenoh topic (API key from WEATHER_API_KEY)
struct Args {
    /// location to fetch weather for (city name, postcode, IP or "lat,lon")
    #[argh(option)]
    city_name: Option<String>,

    /// polling period in seconds (default 3)
    #[argh(option)]
    polling_period: Option<i64>,

    /// language code for condition text (default "en")
    #[argh(option)]
    lang: Option<String>,

    /// topic to publish to (default "weather-events")
    #[argh(option, short = 't')]
    topic: Option<String>,

    /// zenoh endpoint to connect to, e.g. tcp/127.0.0.1:7447
    #[argh(option, short = 'e')]
    endpoint: Option<String>,

    /// path to a YAML configuration file
    #[argh(option, short = 'c')]
    config: Option<String>,
}

impl Args {
    fn settings(&self) -> Settings {
        Settings {
            endpoint: self.endpoint.clone(),
            topic: self.topic.clone(),
            city_name: self.city_name.clone(),
            lang: self.lang.clone(),
            polling_period: self.polling_period,
            ..Default::default()
        }
    }
}

fn load_config(args: &Args) -> Result<ProducerConfig, ConfigError> {
    let file = match &args.config {
        Some(path) => {
            log::info!("Loading config from: {}", path);
            Settings::from_file(path)?
        }
        None => Settings::default(),
    };
    file.merge(Settings::from_env()?).merge(args.settings()).build()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Args = argh::from_env();

    let config = match load_config(&args) {
        Ok(c) => c,
        Err(e) => {
            log::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    log::debug!("{:?}", config);

    let (_shutdown_tx, shutdown_rx) = shutdown::setup_shutdown()?;

    let source = match WeatherApiClient::new(&config.api_url, &config.api_key) {
        Ok(s) => s,
        Err(e) => {
            log::error!("Failed to create weather API client: {}", e);
            std::process::exit(1);
        }
    };

    let session = match zenoh_session::open_zenoh_session(&config.endpoint).await {
        Ok(s) => s,
        Err(e) => {
            log::error!("{:#}", e);
            std::process::exit(1);
        }
    };

    let mut polling = PollingLoop::new(
        config.loop_config,
        source,
        ZenohPublisher::new(session.clone()),
    );
    let report = polling.run(shutdown_rx).await;
    polling.publisher().close();

    log::info!(
        "Shut down after {} iterations ({} published, {} failed)",
        report.iterations,
        report.published,
        report.failures
    );

    if let Err(e) = session.close().await {
        log::warn!("Failed to close Zenoh session: {}", e);
    }

    Ok(())
}
