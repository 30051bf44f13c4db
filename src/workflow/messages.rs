//! Notification and email wording for workflow events.

use chrono::NaiveDateTime;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use super::status::ApplicationStatus;

const TOKEN_QUERY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub title: String,
    pub body: String,
}

pub fn application_received(job_title: &str) -> Message {
    Message {
        title: "Application received".to_string(),
        body: format!(
            "We received your application for \"{job_title}\". You will be notified as it moves forward."
        ),
    }
}

pub fn trial_scheduled(job_title: &str, date: NaiveDateTime) -> Message {
    Message {
        title: "Trial lesson scheduled".to_string(),
        body: format!(
            "Your trial lesson for \"{job_title}\" is scheduled for {}.",
            date.format("%Y-%m-%d %H:%M")
        ),
    }
}

pub fn trial_failed(job_title: &str) -> Message {
    Message {
        title: "Trial lesson result".to_string(),
        body: format!(
            "Thank you for taking the trial lesson for \"{job_title}\". Unfortunately you did not reach the required grade."
        ),
    }
}

pub fn documents_requested(
    job_title: &str,
    upload_link: &str,
    required: &[String],
    valid_days: i64,
) -> Message {
    let mut body = format!(
        "Congratulations, you passed the trial lesson for \"{job_title}\". Please upload your documents here: {upload_link}"
    );
    if !required.is_empty() {
        body.push_str("\nRequired documents: ");
        body.push_str(&required.join(", "));
    }
    body.push_str(&format!("\nThe link is valid for {valid_days} days."));
    Message {
        title: "Documents requested".to_string(),
        body,
    }
}

pub fn documents_received(job_title: &str) -> Message {
    Message {
        title: "Documents received".to_string(),
        body: format!("We received your documents for \"{job_title}\"."),
    }
}

/// Status change notice. Hiring gets its own congratulatory wording.
pub fn status_changed(job_title: &str, status: ApplicationStatus) -> Message {
    match status {
        ApplicationStatus::Hired => Message {
            title: "Congratulations!".to_string(),
            body: format!("Congratulations! You have been hired for \"{job_title}\". Welcome aboard!"),
        },
        other => Message {
            title: "Application status updated".to_string(),
            body: format!(
                "Your application for \"{job_title}\" is now: {}.",
                other.label()
            ),
        },
    }
}

pub fn upload_link(base_url: &str, token: &str) -> String {
    let encoded = utf8_percent_encode(token, TOKEN_QUERY);
    format!("{}/upload?token={encoded}", base_url.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn hired_message_is_congratulatory() {
        let message = status_changed("Math teacher", ApplicationStatus::Hired);
        assert!(message.title.contains("Congratulations"));
        assert!(message.body.contains("hired"));
    }

    #[test]
    fn other_statuses_use_label() {
        let message = status_changed("Math teacher", ApplicationStatus::Rejected);
        assert!(message.body.contains("not selected"));
        assert!(!message.title.contains("Congratulations"));
    }

    #[test]
    fn trial_message_carries_date() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();
        assert!(trial_scheduled("Physics", date).body.contains("2025-06-01 09:30"));
    }

    #[test]
    fn upload_link_encodes_token() {
        let link = upload_link("https://jobs.example.com/", "a.b-c");
        assert_eq!(link, "https://jobs.example.com/upload?token=a.b-c");
        let spaced = upload_link("https://jobs.example.com", "a b");
        assert_eq!(spaced, "https://jobs.example.com/upload?token=a%20b");
    }

    #[test]
    fn documents_request_lists_required_documents() {
        let message = documents_requested(
            "Physics",
            "https://x/upload?token=t",
            &["ID".to_string(), "Diploma".to_string()],
            7,
        );
        assert!(message.body.contains("ID, Diploma"));
        assert!(message.body.contains("https://x/upload?token=t"));
        assert!(message.body.contains("valid for 7 days"));
    }
}
