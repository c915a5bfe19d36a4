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

//! Reading and writing of the line-oriented ITC-2007 `.exam` instance format.
//!
//! Sections begin with a bracketed header (`[Exams:N]`, `[Periods:N]`, `[Rooms:N]`,
//! `[PeriodHardConstraints]`, `[RoomHardConstraints]`, `[InstitutionalWeightings]`);
//! exams, periods and rooms are numbered by file order starting at 0. `write()` emits a
//! file that reparses into a structurally identical instance.

use std::io::{BufRead, BufReader, Write};

use chrono::{NaiveDate, NaiveTime};

use crate::instance::{Instance, InstanceError};
use crate::{
    Exam, Period, PeriodConstraint, PeriodConstraintKind, Room, RoomConstraint, Weighting,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Exams,
    Periods,
    Rooms,
    PeriodHardConstraints,
    RoomHardConstraints,
    InstitutionalWeightings,
}

/// Read an ITC-2007 examination timetabling instance from a reader and build the full
/// problem model from it.
pub fn read<R: std::io::Read>(reader: R) -> Result<Instance, InstanceError> {
    let mut exams = Vec::new();
    let mut periods = Vec::new();
    let mut rooms = Vec::new();
    let mut period_constraints = Vec::new();
    let mut room_constraints = Vec::new();
    let mut weightings = Vec::new();
    let mut declared_counts: Vec<(Section, usize, usize)> = Vec::new();

    let mut section: Option<Section> = None;
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line_number = index + 1;
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let header = &line[1..line.len() - 1];
            let (name, count) = match header.split_once(':') {
                Some((name, count)) => {
                    let count = count.trim().parse::<usize>().map_err(|_| {
                        InstanceError::Syntax {
                            line: line_number,
                            message: format!("invalid section size in header [{}]", header),
                        }
                    })?;
                    (name.trim(), Some(count))
                }
                None => (header.trim(), None),
            };
            let new_section = match name {
                "Exams" => Section::Exams,
                "Periods" => Section::Periods,
                "Rooms" => Section::Rooms,
                "PeriodHardConstraints" => Section::PeriodHardConstraints,
                "RoomHardConstraints" => Section::RoomHardConstraints,
                "InstitutionalWeightings" => Section::InstitutionalWeightings,
                _ => {
                    return Err(InstanceError::Syntax {
                        line: line_number,
                        message: format!("unknown section header [{}]", header),
                    })
                }
            };
            if let Some(count) = count {
                declared_counts.push((new_section, count, line_number));
            }
            section = Some(new_section);
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(|field| field.trim()).collect();
        match section {
            None => {
                return Err(InstanceError::Syntax {
                    line: line_number,
                    message: "data before the first section header".to_string(),
                })
            }
            Some(Section::Exams) => {
                exams.push(read_exam(exams.len(), &fields, line_number)?);
            }
            Some(Section::Periods) => {
                periods.push(read_period(periods.len(), &fields, line_number)?);
            }
            Some(Section::Rooms) => {
                rooms.push(read_room(rooms.len(), &fields, line_number)?);
            }
            Some(Section::PeriodHardConstraints) => {
                period_constraints.push(read_period_constraint(&fields, line_number)?);
            }
            Some(Section::RoomHardConstraints) => {
                room_constraints.push(read_room_constraint(&fields, line_number)?);
            }
            Some(Section::InstitutionalWeightings) => {
                weightings.push(read_weighting(&fields, line_number)?);
            }
        }
    }

    for (declared_section, count, line_number) in declared_counts {
        let actual = match declared_section {
            Section::Exams => exams.len(),
            Section::Periods => periods.len(),
            Section::Rooms => rooms.len(),
            Section::PeriodHardConstraints => period_constraints.len(),
            Section::RoomHardConstraints => room_constraints.len(),
            Section::InstitutionalWeightings => weightings.len(),
        };
        if actual != count {
            return Err(InstanceError::Syntax {
                line: line_number,
                message: format!(
                    "section declares {} entries but contains {}",
                    count, actual
                ),
            });
        }
    }

    Instance::new(
        exams,
        periods,
        rooms,
        period_constraints,
        room_constraints,
        weightings,
    )
}

fn parse_number<T: std::str::FromStr>(
    field: &str,
    line: usize,
    what: &str,
) -> Result<T, InstanceError> {
    field.parse().map_err(|_| InstanceError::Syntax {
        line,
        message: format!("invalid {}: {:?}", what, field),
    })
}

fn read_exam(id: usize, fields: &[&str], line: usize) -> Result<Exam, InstanceError> {
    if fields.is_empty() {
        return Err(InstanceError::Syntax {
            line,
            message: "empty exam line".to_string(),
        });
    }
    let duration = parse_number(fields[0], line, "exam duration")?;
    let students = fields[1..]
        .iter()
        .map(|field| parse_number(field, line, "student id"))
        .collect::<Result<Vec<u32>, InstanceError>>()?;
    Ok(Exam {
        id,
        duration,
        students,
        exclusive: false,
    })
}

fn read_period(id: usize, fields: &[&str], line: usize) -> Result<Period, InstanceError> {
    if fields.len() != 4 {
        return Err(InstanceError::Syntax {
            line,
            message: format!("expected 4 period fields, got {}", fields.len()),
        });
    }
    let date_parts: Vec<&str> = fields[0].split(':').collect();
    if date_parts.len() != 3 {
        return Err(InstanceError::Syntax {
            line,
            message: format!("invalid period date: {:?}", fields[0]),
        });
    }
    let day = parse_number(date_parts[0], line, "day")?;
    let month = parse_number(date_parts[1], line, "month")?;
    let year = parse_number(date_parts[2], line, "year")?;
    let date = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(|| InstanceError::Syntax {
        line,
        message: format!("invalid period date: {:?}", fields[0]),
    })?;

    let time_parts: Vec<&str> = fields[1].split(':').collect();
    if time_parts.len() != 3 {
        return Err(InstanceError::Syntax {
            line,
            message: format!("invalid period time: {:?}", fields[1]),
        });
    }
    let hour = parse_number(time_parts[0], line, "hour")?;
    let minute = parse_number(time_parts[1], line, "minute")?;
    let second = parse_number(time_parts[2], line, "second")?;
    let time =
        NaiveTime::from_hms_opt(hour, minute, second).ok_or_else(|| InstanceError::Syntax {
            line,
            message: format!("invalid period time: {:?}", fields[1]),
        })?;

    Ok(Period {
        id,
        date,
        time,
        duration: parse_number(fields[2], line, "period duration")?,
        penalty: parse_number(fields[3], line, "period penalty")?,
    })
}

fn read_room(id: usize, fields: &[&str], line: usize) -> Result<Room, InstanceError> {
    if fields.len() != 2 {
        return Err(InstanceError::Syntax {
            line,
            message: format!("expected 2 room fields, got {}", fields.len()),
        });
    }
    Ok(Room {
        id,
        capacity: parse_number(fields[0], line, "room capacity")?,
        penalty: parse_number(fields[1], line, "room penalty")?,
    })
}

fn read_period_constraint(
    fields: &[&str],
    line: usize,
) -> Result<PeriodConstraint, InstanceError> {
    if fields.len() != 3 {
        return Err(InstanceError::Syntax {
            line,
            message: format!("expected 3 period constraint fields, got {}", fields.len()),
        });
    }
    let kind = match fields[1] {
        "EXAM_COINCIDENCE" => PeriodConstraintKind::Coincidence,
        "EXCLUSION" => PeriodConstraintKind::Exclusion,
        "AFTER" => PeriodConstraintKind::After,
        other => {
            return Err(InstanceError::Syntax {
                line,
                message: format!("unknown period constraint kind: {:?}", other),
            })
        }
    };
    Ok(PeriodConstraint {
        first: parse_number(fields[0], line, "exam id")?,
        kind,
        second: parse_number(fields[2], line, "exam id")?,
    })
}

fn read_room_constraint(fields: &[&str], line: usize) -> Result<RoomConstraint, InstanceError> {
    if fields.len() != 2 || fields[1] != "ROOM_EXCLUSIVE" {
        return Err(InstanceError::Syntax {
            line,
            message: format!("invalid room constraint: {:?}", fields.join(", ")),
        });
    }
    Ok(RoomConstraint {
        exam: parse_number(fields[0], line, "exam id")?,
    })
}

fn read_weighting(fields: &[&str], line: usize) -> Result<Weighting, InstanceError> {
    let name = fields.first().copied().unwrap_or("");
    let require = |count: usize| -> Result<(), InstanceError> {
        if fields.len() != count + 1 {
            Err(InstanceError::Syntax {
                line,
                message: format!(
                    "{} requires {} parameter(s), got {}",
                    name,
                    count,
                    fields.len() - 1
                ),
            })
        } else {
            Ok(())
        }
    };
    match name {
        "TWOINAROW" => {
            require(1)?;
            Ok(Weighting::TwoInARow(parse_number(fields[1], line, "weight")?))
        }
        "TWOINADAY" => {
            require(1)?;
            Ok(Weighting::TwoInADay(parse_number(fields[1], line, "weight")?))
        }
        "PERIODSPREAD" => {
            require(1)?;
            Ok(Weighting::PeriodSpread(parse_number(
                fields[1], line, "gap",
            )?))
        }
        "NONMIXEDDURATIONS" => {
            require(1)?;
            Ok(Weighting::NonMixedDurations(parse_number(
                fields[1], line, "weight",
            )?))
        }
        "FRONTLOAD" => {
            require(3)?;
            Ok(Weighting::FrontLoad {
                largest: parse_number(fields[1], line, "exam count")?,
                last: parse_number(fields[2], line, "period count")?,
                penalty: parse_number(fields[3], line, "penalty")?,
            })
        }
        other => Err(InstanceError::Syntax {
            line,
            message: format!("unknown institutional weighting: {:?}", other),
        }),
    }
}

/// Write an instance in the `.exam` format. Reparsing the output yields a structurally
/// identical instance.
pub fn write<W: Write>(mut writer: W, instance: &Instance) -> std::io::Result<()> {
    writeln!(writer, "[Exams:{}]", instance.exams.len())?;
    for exam in instance.exams.iter() {
        write!(writer, "{}", exam.duration)?;
        for student in exam.students.iter() {
            write!(writer, ", {}", student)?;
        }
        writeln!(writer)?;
    }

    writeln!(writer, "[Periods:{}]", instance.periods.len())?;
    for period in instance.periods.iter() {
        writeln!(
            writer,
            "{}, {}, {}, {}",
            period.date.format("%d:%m:%Y"),
            period.time.format("%H:%M:%S"),
            period.duration,
            period.penalty
        )?;
    }

    writeln!(writer, "[Rooms:{}]", instance.rooms.len())?;
    for room in instance.rooms.iter() {
        writeln!(writer, "{}, {}", room.capacity, room.penalty)?;
    }

    writeln!(writer, "[PeriodHardConstraints]")?;
    for constraint in instance.period_constraints.iter() {
        let kind = match constraint.kind {
            PeriodConstraintKind::Coincidence => "EXAM_COINCIDENCE",
            PeriodConstraintKind::Exclusion => "EXCLUSION",
            PeriodConstraintKind::After => "AFTER",
        };
        writeln!(
            writer,
            "{}, {}, {}",
            constraint.first, kind, constraint.second
        )?;
    }

    writeln!(writer, "[RoomHardConstraints]")?;
    for constraint in instance.room_constraints.iter() {
        writeln!(writer, "{}, ROOM_EXCLUSIVE", constraint.exam)?;
    }

    writeln!(writer, "[InstitutionalWeightings]")?;
    for weighting in instance.weightings.iter() {
        match weighting {
            Weighting::TwoInARow(weight) => writeln!(writer, "TWOINAROW, {}", weight)?,
            Weighting::TwoInADay(weight) => writeln!(writer, "TWOINADAY, {}", weight)?,
            Weighting::PeriodSpread(gap) => writeln!(writer, "PERIODSPREAD, {}", gap)?,
            Weighting::NonMixedDurations(weight) => {
                writeln!(writer, "NONMIXEDDURATIONS, {}", weight)?
            }
            Weighting::FrontLoad {
                largest,
                last,
                penalty,
            } => writeln!(writer, "FRONTLOAD, {}, {}, {}", largest, last, penalty)?,
        }
    }

    Ok(())
}

// =============================================================================
// Tests
#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[Exams:4]
120, 100, 101, 102
90, 100, 103
60, 104
60, 105, 106
[Periods:3]
15:04:2005, 09:30:00, 210, 0
15:04:2005, 14:00:00, 210, 7
16:04:2005, 09:30:00, 180, 0
[Rooms:2]
260, 0
100, 50
[PeriodHardConstraints]
0, AFTER, 1
2, EXAM_COINCIDENCE, 3
0, EXCLUSION, 2
[RoomHardConstraints]
2, ROOM_EXCLUSIVE
[InstitutionalWeightings]
TWOINAROW, 7
TWOINADAY, 5
PERIODSPREAD, 3
NONMIXEDDURATIONS, 10
FRONTLOAD, 2, 1, 5
";

    #[test]
    fn test_read_sample() {
        let instance = read(SAMPLE.as_bytes()).unwrap();
        assert_eq!(instance.exams.len(), 4);
        assert_eq!(instance.exams[0].duration, 120);
        assert_eq!(instance.exams[0].students, vec![100, 101, 102]);
        // Exams 0 and 1 share student 100, plus nothing else
        assert_eq!(instance.clash(0, 1), 1);
        // Exclusion between 0 and 2 shows up in the clash matrix
        assert_eq!(instance.clash(0, 2), 1);

        assert_eq!(instance.periods.len(), 3);
        assert_eq!(instance.periods[1].penalty, 7);
        assert_eq!(
            instance.periods[2].date,
            chrono::NaiveDate::from_ymd_opt(2005, 4, 16).unwrap()
        );

        assert_eq!(instance.rooms.len(), 2);
        assert_eq!(instance.rooms[1].capacity, 100);

        assert_eq!(instance.period_constraints.len(), 3);
        assert_eq!(instance.coincidence_class(2), &[2, 3]);
        assert!(instance.exams[2].exclusive);

        assert_eq!(instance.weightings.len(), 5);
        assert_eq!(instance.frontload(), Some((2, 1, 5)));
    }

    #[test]
    fn test_roundtrip() {
        let instance = read(SAMPLE.as_bytes()).unwrap();
        let mut buffer = Vec::new();
        write(&mut buffer, &instance).unwrap();
        let reparsed = read(&buffer[..]).unwrap();

        assert_eq!(instance.exams, reparsed.exams);
        assert_eq!(instance.periods, reparsed.periods);
        assert_eq!(instance.rooms, reparsed.rooms);
        assert_eq!(instance.period_constraints, reparsed.period_constraints);
        assert_eq!(instance.room_constraints, reparsed.room_constraints);
        assert_eq!(instance.weightings, reparsed.weightings);
    }

    #[test]
    fn test_bad_header() {
        let result = read("[Examz:1]\n120, 1\n".as_bytes());
        assert!(matches!(result, Err(InstanceError::Syntax { line: 1, .. })));
    }

    #[test]
    fn test_count_mismatch() {
        let result = read("[Exams:2]\n120, 1\n".as_bytes());
        assert!(matches!(result, Err(InstanceError::Syntax { line: 1, .. })));
    }

    #[test]
    fn test_malformed_weighting() {
        let input = "[Exams:1]\n120, 1\n[Periods:1]\n15:04:2005, 09:30:00, 210, 0\n\
                     [Rooms:1]\n10, 0\n[InstitutionalWeightings]\nFRONTLOAD, 2\n";
        let result = read(input.as_bytes());
        assert!(matches!(result, Err(InstanceError::Syntax { line: 8, .. })));
    }

    #[test]
    fn test_data_before_header() {
        let result = read("120, 1\n".as_bytes());
        assert!(matches!(result, Err(InstanceError::Syntax { line: 1, .. })));
    }

    #[test]
    fn test_out_of_range_constraint() {
        let input = "[Exams:1]\n120, 1\n[Periods:1]\n15:04:2005, 09:30:00, 210, 0\n\
                     [Rooms:1]\n10, 0\n[PeriodHardConstraints]\n0, AFTER, 5\n";
        let result = read(input.as_bytes());
        assert!(matches!(
            result,
            Err(InstanceError::ExamIndexOutOfRange { index: 5, .. })
        ));
    }
}
