// Copyright 2024 by Michael Thies <mail@mhthies.de>
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not use this file except in compliance with
// the License. You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied. See the License for the
// specific language governing permissions and limitations under the License.

pub mod exam_format;

use std::fmt::Write as FmtWrite;
use std::io::Write;

use serde_json::json;

use crate::evaluator::ScoreBreakdown;
use crate::instance::Instance;
use crate::Booking;

/// Write the solution file: one `(exam, period, room)` line per booking in exam-id order
/// (`(exam, period, [rooms])` for split bookings), followed by the labeled hard and soft
/// score components.
pub fn write_solution<W: Write>(
    mut writer: W,
    bookings: &[Booking],
    score: &ScoreBreakdown,
) -> std::io::Result<()> {
    for booking in bookings {
        if booking.rooms.len() == 1 {
            writeln!(
                writer,
                "({}, {}, {})",
                booking.exam, booking.period, booking.rooms[0]
            )?;
        } else {
            writeln!(
                writer,
                "({}, {}, [{}])",
                booking.exam,
                booking.period,
                booking
                    .rooms
                    .iter()
                    .map(|room| room.to_string())
                    .collect::<Vec<String>>()
                    .join(", ")
            )?;
        }
    }
    writeln!(writer, "{}", score)?;
    Ok(())
}

/// Write the solution and its score breakdown as a JSON report
pub fn write_report_json<W: Write>(
    writer: W,
    bookings: &[Booking],
    score: &ScoreBreakdown,
) -> Result<(), String> {
    let data = json!({
        "format": "X-examtimetable",
        "version": "1.0",
        "bookings": serde_json::to_value(bookings).map_err(|e| format!("{}", e))?,
        "score": serde_json::to_value(score).map_err(|e| format!("{}", e))?,
    });
    serde_json::to_writer(writer, &data).map_err(|e| format!("{}", e))?;
    Ok(())
}

/// Format the calculated timetable into a human readable String (e.g. to print it to
/// stdout).
///
/// The output format will look like
/// ```text
/// ===== Period 0 (15:04:2005 09:30) =====
/// - Exam 3 (120 min, 35 students) in room 1
/// - Exam 7 (90 min, 12 students) in rooms 0, 2
/// ```
pub fn format_timetable(instance: &Instance, bookings: &[Booking]) -> String {
    let mut result = String::new();
    for period in instance.periods.iter() {
        write!(
            result,
            "\n===== Period {} ({} {}) =====\n",
            period.id,
            period.date.format("%d:%m:%Y"),
            period.time.format("%H:%M")
        )
        .unwrap();
        for booking in bookings.iter().filter(|b| b.period == period.id) {
            let exam = &instance.exams[booking.exam];
            writeln!(
                result,
                "- Exam {} ({} min, {} students) in {}",
                exam.id,
                exam.duration,
                exam.size(),
                if booking.rooms.len() == 1 {
                    format!("room {}", booking.rooms[0])
                } else {
                    format!(
                        "rooms {}",
                        booking
                            .rooms
                            .iter()
                            .map(|room| room.to_string())
                            .collect::<Vec<String>>()
                            .join(", ")
                    )
                }
            )
            .unwrap();
        }
    }
    result
}
