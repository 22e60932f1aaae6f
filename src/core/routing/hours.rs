//! 营业时间模块
//!
//! 以巴拿马时区判断门店是否在营业时间内：
//! 工作日 6:00-22:00，周末 7:00-20:00。

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use chrono_tz::America::Panama;

/// 判断门店当前是否营业
pub fn is_store_open() -> bool {
    is_store_open_at(Utc::now())
}

/// 判断给定时刻门店是否营业
pub fn is_store_open_at(now: DateTime<Utc>) -> bool {
    let local = now.with_timezone(&Panama);
    let hour = local.hour();

    let weekday = matches!(
        local.weekday(),
        Weekday::Mon | Weekday::Tue | Weekday::Wed | Weekday::Thu | Weekday::Fri
    );

    let (open, close) = if weekday { (6, 22) } else { (7, 20) };

    hour >= open && hour < close
}
