//! Posting the rota to Slack, once or on a weekly trigger.

use std::time::Duration;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::{NotifyConfig, ScheduleConfig};
use crate::error::{OpsError, Result};
use crate::interrupt::Interrupt;
use crate::rota::{RotaEntry, RotaSource, RotaWeeks};

const SLACK_API: &str = "https://slack.com/api";

/// Text plus Block Kit blocks for one rota announcement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlackMessage {
    pub text: String,
    pub blocks: Vec<Value>,
}

fn assignment(label: &str, entry: Option<&RotaEntry>) -> String {
    match entry {
        Some(entry) => format!("*{label}* ({}): {}", entry.date_range(), entry.person),
        None => format!("*{label}*: No assignment found"),
    }
}

pub fn rota_message(weeks: &RotaWeeks) -> SlackMessage {
    let current = assignment("This week", weeks.current.as_ref());
    let next = assignment("Next week", weeks.next.as_ref());
    let text = match &weeks.current {
        Some(entry) => format!("Janitor rota: {} is on duty this week", entry.person),
        None => "Janitor rota: no assignment found for this week".to_string(),
    };
    let blocks = vec![
        json!({
            "type": "header",
            "text": { "type": "plain_text", "text": "Janitor ROTA" }
        }),
        json!({
            "type": "section",
            "text": { "type": "mrkdwn", "text": format!("{current}\n{next}") }
        }),
    ];
    SlackMessage { text, blocks }
}

#[derive(Debug, Deserialize)]
struct SlackResponse {
    ok: bool,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Message timestamp and channel of a successful `chat.postMessage`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub ts: String,
    pub channel: String,
}

fn check_slack(body: &str, method: &str) -> Result<SlackResponse> {
    let response: SlackResponse = serde_json::from_str(body)?;
    if !response.ok {
        return Err(OpsError::Remote(format!(
            "{method}: {}",
            response.error.as_deref().unwrap_or("unknown error")
        )));
    }
    Ok(response)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Bot {
        token: String,
        channel: String,
        pin: bool,
    },
    Webhook {
        url: String,
    },
}

impl Delivery {
    /// A bot token wins over a webhook; a bot token needs a channel.
    pub fn from_config(config: &NotifyConfig) -> Result<Self> {
        if let Some(token) = config.slack_token.clone() {
            let channel = config.channel.clone().ok_or_else(|| {
                OpsError::Config("SLACK_CHANNEL is required with a bot token".to_string())
            })?;
            return Ok(Delivery::Bot {
                token,
                channel,
                pin: config.pin,
            });
        }
        if let Some(url) = config.webhook_url.clone() {
            return Ok(Delivery::Webhook { url });
        }
        Err(OpsError::Config(
            "set SLACK_BOT_TOKEN (with SLACK_CHANNEL) or SLACK_WEBHOOK_URL".to_string(),
        ))
    }
}

pub struct SlackNotifier {
    client: reqwest::Client,
    delivery: Delivery,
    api_base: String,
}

impl SlackNotifier {
    pub fn new(delivery: Delivery) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            delivery,
            api_base: SLACK_API.to_string(),
        })
    }

    /// Posts `message`. Returns the posted message for bot deliveries and
    /// `None` for webhooks, which do not report one.
    pub async fn post(&self, message: &SlackMessage) -> Result<Option<PostedMessage>> {
        match &self.delivery {
            Delivery::Bot { token, channel, pin } => {
                let posted = self.post_as_bot(token, channel, message).await?;
                if *pin {
                    if let Err(err) = self.pin(token, &posted).await {
                        warn!(error = %err, "Message posted but pinning failed");
                    }
                }
                Ok(Some(posted))
            }
            Delivery::Webhook { url } => {
                self.post_webhook(url, message).await?;
                Ok(None)
            }
        }
    }

    async fn post_as_bot(&self, token: &str, channel: &str, message: &SlackMessage) -> Result<PostedMessage> {
        let payload = json!({
            "channel": channel,
            "text": message.text,
            "blocks": message.blocks,
        });
        let body = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?
            .text()
            .await?;
        let response = check_slack(&body, "chat.postMessage")?;
        let posted = PostedMessage {
            ts: response.ts.unwrap_or_default(),
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
        };
        info!(channel = %posted.channel, ts = %posted.ts, "Rota posted to Slack");
        Ok(posted)
    }

    async fn pin(&self, token: &str, posted: &PostedMessage) -> Result<()> {
        let payload = json!({ "channel": posted.channel, "timestamp": posted.ts });
        let body = self
            .client
            .post(format!("{}/pins.add", self.api_base))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await?
            .text()
            .await?;
        check_slack(&body, "pins.add")?;
        info!(ts = %posted.ts, "Message pinned");
        Ok(())
    }

    async fn post_webhook(&self, url: &str, message: &SlackMessage) -> Result<()> {
        let response = self.client.post(url).json(message).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status != reqwest::StatusCode::OK || body.trim() != "ok" {
            return Err(OpsError::Remote(format!(
                "webhook returned status {status}: {}",
                body.trim()
            )));
        }
        info!("Rota posted to Slack webhook");
        Ok(())
    }
}

/// Weekday, local time and IANA timezone of the weekly post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    pub weekday: Weekday,
    pub time: NaiveTime,
    pub timezone: Tz,
}

impl WeeklySchedule {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let weekday = config
            .weekday
            .parse::<Weekday>()
            .map_err(|_| OpsError::Config(format!("unknown weekday '{}'", config.weekday)))?;
        let time = NaiveTime::from_hms_opt(config.hour, config.minute, 0).ok_or_else(|| {
            OpsError::Config(format!("invalid time {}:{}", config.hour, config.minute))
        })?;
        let timezone = parse_timezone(&config.timezone)?;
        Ok(Self {
            weekday,
            time,
            timezone,
        })
    }

    /// First trigger strictly after `now`. Local times skipped by a DST
    /// change fall through to the following week.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = now.with_timezone(&self.timezone).date_naive();
        (0..=14u64).find_map(|offset| {
            let day = today.checked_add_days(Days::new(offset))?;
            if day.weekday() != self.weekday {
                return None;
            }
            let local = self
                .timezone
                .from_local_datetime(&day.and_time(self.time))
                .earliest()?;
            let at = local.with_timezone(&Utc);
            (at > now).then_some(at)
        })
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|err| OpsError::Config(format!("unknown timezone '{name}': {err}")))
}

/// The calendar day in `timezone` at `now`; rota weeks are resolved
/// against it.
pub fn today_in(timezone: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&timezone).date_naive()
}

/// Loads the rota and posts this week's message.
pub async fn post_rota(
    notifier: &SlackNotifier,
    source: &RotaSource,
    timezone: Tz,
) -> Result<Option<PostedMessage>> {
    let rota = source.load().await?;
    let today = today_in(timezone, Utc::now());
    let message = rota_message(&rota.weeks(today));
    notifier.post(&message).await
}

/// Sleeps until each trigger and posts, until Ctrl+C. Returns the number of
/// posts made.
pub async fn watch(notifier: &SlackNotifier, source: &RotaSource, schedule: &WeeklySchedule) -> Result<u32> {
    let mut posts = 0;
    let mut interrupted = Interrupt::global().listen();
    loop {
        let now = Utc::now();
        let next = schedule
            .next_after(now)
            .ok_or_else(|| OpsError::Config("schedule never triggers".to_string()))?;
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next = %next.with_timezone(&schedule.timezone), "Waiting for next rota post");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = interrupted.triggered() => {
                info!(posts, "Stopping rota watcher");
                return Ok(posts);
            }
        }

        match post_rota(notifier, source, schedule.timezone).await {
            Ok(_) => posts += 1,
            Err(err) => warn!(error = %err, "Scheduled rota post failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(y: i32, m: u32, d: u32, person: &str) -> RotaEntry {
        RotaEntry {
            start: NaiveDate::from_ymd_opt(y, m, d).unwrap(),
            person: person.to_string(),
        }
    }

    #[test]
    fn message_lists_both_weeks() {
        let weeks = RotaWeeks {
            current: Some(entry(2025, 1, 27, "Alice")),
            next: Some(entry(2025, 2, 3, "Bob")),
        };
        let message = rota_message(&weeks);
        assert_eq!(message.text, "Janitor rota: Alice is on duty this week");
        let section = message.blocks[1]["text"]["text"].as_str().unwrap();
        assert_eq!(
            section,
            "*This week* (27-31.01): Alice\n*Next week* (3-7.02): Bob"
        );
    }

    #[test]
    fn slack_errors_surface_the_error_code() {
        let err = check_slack(r#"{"ok":false,"error":"channel_not_found"}"#, "chat.postMessage").unwrap_err();
        assert!(err.to_string().contains("channel_not_found"));
        let ok = check_slack(r#"{"ok":true,"ts":"1700000000.000100","channel":"C1"}"#, "chat.postMessage").unwrap();
        assert_eq!(ok.ts.as_deref(), Some("1700000000.000100"));
    }

    #[test]
    fn bot_token_requires_channel() {
        let config = NotifyConfig {
            slack_token: Some("xoxb-1".into()),
            ..NotifyConfig::default()
        };
        assert!(matches!(Delivery::from_config(&config), Err(OpsError::Config(_))));

        let config = NotifyConfig {
            webhook_url: Some("https://hooks.slack.test/x".into()),
            ..NotifyConfig::default()
        };
        assert_eq!(
            Delivery::from_config(&config).unwrap(),
            Delivery::Webhook { url: "https://hooks.slack.test/x".into() }
        );
    }

    #[test]
    fn next_trigger_respects_timezone() {
        let schedule = WeeklySchedule::from_config(&ScheduleConfig {
            weekday: "Mon".into(),
            hour: 9,
            minute: 0,
            timezone: "Europe/Riga".into(),
        })
        .unwrap();

        // Monday 2025-01-06 06:00 UTC is 08:00 in Riga.
        let before = Utc.with_ymd_and_hms(2025, 1, 6, 6, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(before),
            Some(Utc.with_ymd_and_hms(2025, 1, 6, 7, 0, 0).unwrap())
        );

        let at_trigger = Utc.with_ymd_and_hms(2025, 1, 6, 7, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(at_trigger),
            Some(Utc.with_ymd_and_hms(2025, 1, 13, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn trigger_in_spring_forward_gap_moves_to_next_week() {
        let schedule = WeeklySchedule::from_config(&ScheduleConfig {
            weekday: "Sun".into(),
            hour: 3,
            minute: 30,
            timezone: "Europe/Riga".into(),
        })
        .unwrap();

        // 03:30 does not exist in Riga on 2025-03-30; a week later it is
        // EEST (UTC+3).
        let saturday = Utc.with_ymd_and_hms(2025, 3, 29, 12, 0, 0).unwrap();
        assert_eq!(
            schedule.next_after(saturday),
            Some(Utc.with_ymd_and_hms(2025, 4, 6, 0, 30, 0).unwrap())
        );
    }

    #[test]
    fn today_follows_the_configured_timezone() {
        let sunday_evening_utc = Utc.with_ymd_and_hms(2025, 1, 12, 20, 0, 0).unwrap();
        let auckland = parse_timezone("Pacific/Auckland").unwrap();
        assert_eq!(today_in(auckland, sunday_evening_utc), NaiveDate::from_ymd_opt(2025, 1, 13).unwrap());
        assert_eq!(today_in(Tz::UTC, sunday_evening_utc), NaiveDate::from_ymd_opt(2025, 1, 12).unwrap());
        assert!(matches!(parse_timezone("Mars/Olympus"), Err(OpsError::Config(_))));
    }

    #[test]
    fn bad_schedule_values_are_config_errors() {
        let config = ScheduleConfig {
            weekday: "Someday".into(),
            ..ScheduleConfig::default()
        };
        assert!(matches!(WeeklySchedule::from_config(&config), Err(OpsError::Config(_))));
    }
}
