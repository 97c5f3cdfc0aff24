//! Send-eligibility rules evaluated before every outbound send.
//!
//! The guard is a pure function over a `GuardInput` the processor assembles
//! from the stores; it performs no I/O itself, which keeps every rule
//! deterministic under test.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use outflow_core::{
    ChannelKind, Contact, Conversation, DispatchConfig, FailureCode, MessageKind, OutboxMessage,
};

/// Everything a single guard evaluation needs.
#[derive(Debug, Clone)]
pub struct GuardInput {
    pub job: OutboxMessage,
    pub contact: Contact,
    pub conversation: Option<Conversation>,
    pub now: DateTime<Utc>,
    /// Tenant-wide non-failed outbound messages created since UTC midnight.
    pub sent_today: u64,
    /// Most recent inbound message from this contact on the job's channel.
    pub last_inbound_at: Option<DateTime<Utc>>,
}

/// Outcome of a guard evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardVerdict {
    /// All rules passed; send now.
    Send,
    /// Deferred; requeue at the given time without consuming an attempt.
    Reschedule(DateTime<Utc>),
    /// Permanent business veto; fail terminally without consuming an attempt.
    Fail(FailureCode),
}

/// Evaluates opt-out, session-window, quiet-hours, daily-cap, and lead-time
/// rules, in that order. The first rule that vetoes or defers wins.
#[derive(Debug, Clone)]
pub struct DispatchGuard {
    config: DispatchConfig,
}

impl DispatchGuard {
    #[must_use]
    pub fn new(config: DispatchConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn evaluate(&self, input: &GuardInput) -> GuardVerdict {
        if input.contact.is_opted_out(input.job.channel) {
            return GuardVerdict::Fail(FailureCode::OptOut);
        }

        // Free-form WhatsApp text requires a live 24h session; template
        // sends use pre-approved templates and are exempt.
        if input.job.channel == ChannelKind::WhatsApp && input.job.kind == MessageKind::Text {
            let window = Duration::hours(self.config.session_window_hours);
            let in_session =
                input.last_inbound_at.is_some_and(|at| input.now - at < window);
            if !in_session {
                return GuardVerdict::Fail(FailureCode::WhatsAppSessionExpired);
            }
        }

        let tz = contact_timezone(&input.contact);
        let send_at = input.job.scheduled_at.unwrap_or(input.now).max(input.now);

        if let Some(window) = self.config.quiet_hours {
            let local = send_at.with_timezone(&tz);
            if window.contains(local.time()) {
                return GuardVerdict::Reschedule(first_after_quiet(local, window.end, &tz));
            }
        }

        if let Some(cap) = self.config.daily_send_cap {
            if input.sent_today >= cap {
                let local = send_at.with_timezone(&tz);
                let resume = next_day_at(local, self.config.daily_cap_resume_at, &tz);
                return GuardVerdict::Reschedule(resume);
            }
        }

        // Caller-requested times inside the lead window race job creation;
        // bump them forward instead of sending early.
        let floor = input.now + Duration::seconds(self.config.min_lead_secs);
        if let Some(requested) = input.job.scheduled_at {
            if requested > input.now && requested < floor {
                return GuardVerdict::Reschedule(floor);
            }
        }

        GuardVerdict::Send
    }
}

fn contact_timezone(contact: &Contact) -> Tz {
    contact
        .timezone
        .as_deref()
        .and_then(|name| name.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::UTC)
}

/// First minute after the quiet window ends, local time, returned in UTC.
fn first_after_quiet(local: DateTime<Tz>, window_end: NaiveTime, tz: &Tz) -> DateTime<Utc> {
    let end_today = local.date_naive().and_time(window_end);
    let candidate = if end_today > local.naive_local() {
        end_today
    } else {
        // Inside the pre-midnight half of a wrapping window; the window
        // ends tomorrow morning.
        end_today + Duration::days(1)
    } + Duration::minutes(1);

    resolve_local(candidate, tz)
}

/// `resume_at` local time on the day after `local`, returned in UTC.
fn next_day_at(local: DateTime<Tz>, resume_at: NaiveTime, tz: &Tz) -> DateTime<Utc> {
    let next_day = local.date_naive() + Duration::days(1);
    resolve_local(next_day.and_time(resume_at), tz)
}

fn resolve_local(naive: chrono::NaiveDateTime, tz: &Tz) -> DateTime<Utc> {
    // DST gaps/overlaps: take the earliest valid interpretation, or nudge
    // forward an hour if the local time does not exist.
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.with_timezone(&Utc)
        },
        chrono::LocalResult::None => {
            let nudged = naive + Duration::hours(1);
            tz.from_local_datetime(&nudged)
                .earliest()
                .map_or_else(|| Utc.from_utc_datetime(&nudged), |dt| dt.with_timezone(&Utc))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outflow_core::NewOutboxMessage;
    use uuid::Uuid;

    fn contact(timezone: Option<&str>) -> Contact {
        Contact {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            full_name: None,
            email: Some("a@example.com".to_owned()),
            phone: Some("+15550001111".to_owned()),
            timezone: timezone.map(str::to_owned),
            tags: Vec::new(),
            opted_out: false,
        }
    }

    fn input_at(now: DateTime<Utc>, channel: ChannelKind, contact: Contact) -> GuardInput {
        let job = NewOutboxMessage::text(contact.tenant_id, contact.id, channel, "hello")
            .into_message(now);
        GuardInput { job, contact, conversation: None, now, sent_today: 0, last_inbound_at: None }
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        chrono::NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
            .and_utc()
    }

    fn guard() -> DispatchGuard {
        DispatchGuard::new(DispatchConfig::default())
    }

    #[test]
    fn test_opted_out_contact_fails_regardless_of_time() {
        let mut contact = contact(None);
        contact.tags.push("stop".to_owned());
        // Deep inside quiet hours; opt-out still wins.
        let input = input_at(utc(2026, 3, 10, 23, 0), ChannelKind::Email, contact);
        assert_eq!(guard().evaluate(&input), GuardVerdict::Fail(FailureCode::OptOut));
    }

    #[test]
    fn test_whatsapp_text_without_session_fails() {
        let now = utc(2026, 3, 10, 12, 0);
        let mut input = input_at(now, ChannelKind::WhatsApp, contact(None));
        input.last_inbound_at = Some(now - Duration::hours(25));
        assert_eq!(
            guard().evaluate(&input),
            GuardVerdict::Fail(FailureCode::WhatsAppSessionExpired)
        );
    }

    #[test]
    fn test_whatsapp_text_inside_session_sends() {
        let now = utc(2026, 3, 10, 12, 0);
        let mut input = input_at(now, ChannelKind::WhatsApp, contact(None));
        input.last_inbound_at = Some(now - Duration::hours(1));
        assert_eq!(guard().evaluate(&input), GuardVerdict::Send);
    }

    #[test]
    fn test_whatsapp_template_exempt_from_session_rule() {
        let now = utc(2026, 3, 10, 12, 0);
        let contact = contact(None);
        let job = NewOutboxMessage::template(
            contact.tenant_id,
            contact.id,
            ChannelKind::WhatsApp,
            Uuid::new_v4(),
            serde_json::json!({}),
        )
        .into_message(now);
        let input = GuardInput {
            job,
            contact,
            conversation: None,
            now,
            sent_today: 0,
            last_inbound_at: None,
        };
        assert_eq!(guard().evaluate(&input), GuardVerdict::Send);
    }

    #[test]
    fn test_quiet_hours_reschedules_after_window_end() {
        // 23:00 UTC inside the default 22:00-08:00 window.
        let input = input_at(utc(2026, 3, 10, 23, 0), ChannelKind::Email, contact(None));
        match guard().evaluate(&input) {
            GuardVerdict::Reschedule(at) => {
                assert_eq!(at, utc(2026, 3, 11, 8, 1));
            },
            other => panic!("expected reschedule, got {other:?}"),
        }
    }

    #[test]
    fn test_quiet_hours_uses_contact_timezone() {
        // 21:00 UTC is 23:00 in Berlin (CEST): quiet there, not in UTC.
        let input =
            input_at(utc(2026, 6, 10, 21, 0), ChannelKind::Email, contact(Some("Europe/Berlin")));
        match guard().evaluate(&input) {
            GuardVerdict::Reschedule(at) => {
                // 08:01 Berlin the next morning is 06:01 UTC.
                assert_eq!(at, utc(2026, 6, 11, 6, 1));
            },
            other => panic!("expected reschedule, got {other:?}"),
        }
    }

    #[test]
    fn test_early_morning_quiet_reschedules_same_day() {
        let input = input_at(utc(2026, 3, 10, 6, 0), ChannelKind::Email, contact(None));
        match guard().evaluate(&input) {
            GuardVerdict::Reschedule(at) => {
                assert_eq!(at, utc(2026, 3, 10, 8, 1));
            },
            other => panic!("expected reschedule, got {other:?}"),
        }
    }

    #[test]
    fn test_reschedule_is_never_in_the_past() {
        let now = utc(2026, 3, 10, 23, 30);
        let input = input_at(now, ChannelKind::Email, contact(None));
        match guard().evaluate(&input) {
            GuardVerdict::Reschedule(at) => assert!(at > now),
            other => panic!("expected reschedule, got {other:?}"),
        }
    }

    #[test]
    fn test_daily_cap_reschedules_next_day_resume_slot() {
        let now = utc(2026, 3, 10, 12, 0);
        let mut input = input_at(now, ChannelKind::Email, contact(None));
        input.sent_today = 200;
        match guard().evaluate(&input) {
            GuardVerdict::Reschedule(at) => {
                assert_eq!(at, utc(2026, 3, 11, 10, 30));
            },
            other => panic!("expected reschedule, got {other:?}"),
        }
    }

    #[test]
    fn test_under_cap_sends() {
        let now = utc(2026, 3, 10, 12, 0);
        let mut input = input_at(now, ChannelKind::Email, contact(None));
        input.sent_today = 199;
        assert_eq!(guard().evaluate(&input), GuardVerdict::Send);
    }

    #[test]
    fn test_min_lead_time_bumps_near_future_schedule() {
        let now = utc(2026, 3, 10, 12, 0);
        let mut input = input_at(now, ChannelKind::Email, contact(None));
        input.job.scheduled_at = Some(now + Duration::minutes(2));
        assert_eq!(
            guard().evaluate(&input),
            GuardVerdict::Reschedule(now + Duration::minutes(5))
        );
    }

    #[test]
    fn test_due_unscheduled_job_sends_immediately() {
        let input = input_at(utc(2026, 3, 10, 12, 0), ChannelKind::Email, contact(None));
        assert_eq!(guard().evaluate(&input), GuardVerdict::Send);
    }
}
