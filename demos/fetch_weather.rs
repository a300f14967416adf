use chrono::NaiveDate;
use weather_ingest::{IngestConfig, IngestError, LatLon, Location, WeatherIngest};

const START_DATE: (i32, u32, u32) = (2023, 1, 1);
const END_DATE: (i32, u32, u32) = (2023, 2, 7);

#[tokio::main]
async fn main() -> Result<(), IngestError> {
    env_logger::init();

    let start = NaiveDate::from_ymd_opt(START_DATE.0, START_DATE.1, START_DATE.2).unwrap();
    let end = NaiveDate::from_ymd_opt(END_DATE.0, END_DATE.1, END_DATE.2).unwrap();

    let ingest = WeatherIngest::with_config(IngestConfig::builder().models("ecmwf_ifs").build())?;

    // With a location table in ./data/results/locations.csv:
    // let summary = ingest.fetch_and_save().start(start).end(end).call().await?;

    let locations = [
        Location::new("utr", "Utrecht", LatLon(52.0908, 5.1222)),
        Location::new("ams", "Amsterdam", LatLon(52.3676, 4.9041)),
    ];
    let outcome = ingest
        .fetch()
        .start(start)
        .end(end)
        .locations(&locations)
        .call()
        .await?;

    println!("{}", outcome.summary);
    for row in outcome.results.rows().take(5) {
        println!("{} {} {:?}", row.location.id, row.timestamp, row.values);
    }
    Ok(())
}
