use chrono::{DateTime, Duration, NaiveTime, Utc};
use diesel::r2d2::{ConnectionManager, Pool, PoolError};
use diesel::PgConnection;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

pub fn create_conn(database_url: &str) -> Result<DbPool, PoolError> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder().build(manager)
}

/// Half-open [start, end) bounds of the UTC calendar day containing `now`.
/// The SLA monitor dedups breach notifications against this window.
pub fn utc_day_bounds(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn day_bounds_cover_midnight_and_last_second() {
        let noon = Utc.with_ymd_and_hms(2026, 3, 10, 12, 30, 0).unwrap();
        let (start, end) = utc_day_bounds(noon);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap());

        let (s2, _) = utc_day_bounds(start);
        assert_eq!(s2, start);
        let last = Utc.with_ymd_and_hms(2026, 3, 10, 23, 59, 59).unwrap();
        let (s3, e3) = utc_day_bounds(last);
        assert_eq!(s3, start);
        assert!(last < e3);
    }
}
