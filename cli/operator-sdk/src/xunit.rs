//! xUnit XML report.
//!
//! One `<testsuite>` per scorecard test and one `<testcase>` per result.

use osdk_scorecard::{State, TestList};
use quick_junit::{NonSuccessKind, Property, Report, TestCase, TestCaseStatus, TestSuite};

const REPORT_NAME: &str = "scorecard";

const IMAGE_PROPERTY: &str = "spec.image";
const ENTRYPOINT_PROPERTY: &str = "spec.entrypoint";
const TEST_PROPERTY: &str = "labels.test";
const CLUSTER_PHASE_PROPERTY: &str = "labels.cluster-phase";

/// Replace characters XML 1.0 cannot carry with U+FFFD.
fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\t' | '\n' | '\r' => c,
            c if c < '\u{20}' => char::REPLACEMENT_CHARACTER,
            '\u{FFFE}' | '\u{FFFF}' => char::REPLACEMENT_CHARACTER,
            c => c,
        })
        .collect()
}

/// Build the report for a test list.
pub fn from_test_list(list: &TestList) -> Report {
    let mut report = Report::new(REPORT_NAME);

    for (i, item) in list.items.iter().enumerate() {
        let name = item
            .spec
            .test_name()
            .map(sanitize)
            .unwrap_or_else(|| format!("testsuite-{:03}", i + 1));

        let mut suite = TestSuite::new(name.clone());
        suite.add_property(Property::new(IMAGE_PROPERTY, sanitize(&item.spec.image)));
        suite.add_property(Property::new(
            ENTRYPOINT_PROPERTY,
            sanitize(&item.spec.entrypoint.join(" ")),
        ));
        suite.add_property(Property::new(TEST_PROPERTY, name));
        if let Some(phase) = item.spec.labels.get("cluster-phase") {
            suite.add_property(Property::new(CLUSTER_PHASE_PROPERTY, sanitize(phase)));
        }

        for result in &item.status.results {
            let status = match result.state {
                State::Pass => TestCaseStatus::success(),
                State::Fail => non_success(NonSuccessKind::Failure, "failure", &result.errors),
                State::Error => non_success(NonSuccessKind::Error, "error", &result.errors),
            };

            let mut case = TestCase::new(sanitize(&result.name), status);
            if let Some(timestamp) = result.creation_timestamp {
                case.set_timestamp(timestamp);
            }
            if !result.log.is_empty() {
                case.set_system_out(sanitize(&result.log));
            }
            suite.add_test_case(case);
        }

        report.add_test_suite(suite);
    }

    report
}

fn non_success(kind: NonSuccessKind, ty: &str, errors: &[String]) -> TestCaseStatus {
    let mut status = TestCaseStatus::non_success(kind);
    status.set_type(ty);
    status.set_message(sanitize(&errors.join("\n")));
    status
}

/// Serialize the report for a test list as XML, ending in a newline.
pub fn to_xml(list: &TestList) -> Result<String, quick_junit::SerializeError> {
    let mut xml = from_test_list(list).to_string()?;
    if !xml.ends_with('\n') {
        xml.push('\n');
    }
    Ok(xml)
}
