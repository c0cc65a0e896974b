/*!
Enrollment rules.

Everything in here is pure. A student's current enrollments are described by
a `Load` (the `Seat`s they hold); the functions here look at a `Load` and a
candidate `Seat` and either allow the change or return the `Refusal` that
explains why not.

The `Store` is responsible for building the `Load` inside the same
transaction that writes the change, so a decision made here still holds when
the write lands.
*/
use std::fmt::{Display, Formatter};

use serde::Deserialize;

pub const DEFAULT_MAX_SUBJECTS: usize = 3;
pub const DEFAULT_MAX_CREDITS: i32 = 21;
pub const DEFAULT_MAX_TEACHER_SUBJECTS: usize = 2;

/// Caps enforced on every enrollment and subject assignment.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Limits {
    /// Most subjects a student may hold at once.
    pub max_subjects: usize,
    /// Most credits a student may carry at once.
    pub max_credits: i32,
    /// Most subjects a teacher may own at once.
    pub max_teacher_subjects: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_subjects: DEFAULT_MAX_SUBJECTS,
            max_credits: DEFAULT_MAX_CREDITS,
            max_teacher_subjects: DEFAULT_MAX_TEACHER_SUBJECTS,
        }
    }
}

/// The parts of a subject the rules care about.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Seat {
    pub subject: i64,
    pub credits: i32,
    pub teacher: Option<i64>,
}

/// Everything a single student is currently enrolled in.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Load {
    seats: Vec<Seat>,
}

impl Load {
    pub fn new(seats: Vec<Seat>) -> Self { Self { seats } }

    pub fn seats(&self) -> &[Seat] { &self.seats }

    pub fn count(&self) -> usize { self.seats.len() }

    /// Summed as `i64`, so no combination of seats can overflow it.
    pub fn total_credits(&self) -> i64 {
        self.seats.iter().map(|s| i64::from(s.credits)).sum()
    }

    pub fn seat(&self, subject: i64) -> Option<&Seat> {
        self.seats.iter().find(|s| s.subject == subject)
    }

    pub fn holds(&self, subject: i64) -> bool {
        self.seat(subject).is_some()
    }

    /// Whether this load holds some subject other than `except` that is
    /// taught by `teacher`.
    pub fn holds_teacher(&self, teacher: i64, except: i64) -> bool {
        self.seats.iter()
            .any(|s| s.subject != except && s.teacher == Some(teacher))
    }

    /// Check `seat` against `limits` and, if it passes, add it.
    pub fn enroll(&mut self, limits: &Limits, seat: Seat) -> Result<(), Refusal> {
        check_enroll(limits, self, &seat)?;
        self.seats.push(seat);
        Ok(())
    }

    /// Remove the seat for `subject`, returning it.
    pub fn drop_subject(&mut self, subject: i64) -> Result<Seat, Refusal> {
        let seat = check_drop(self, subject)?;
        self.seats.retain(|s| s.subject != subject);
        Ok(seat)
    }
}

/// Why a change was not allowed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Refusal {
    AlreadyEnrolled,
    SameTeacher,
    SubjectLimit(usize),
    CreditLimit { total: i64, limit: i32 },
    NotEnrolled,
    TeacherSubjectLimit(usize),
    /// Moving a subject to a teacher would leave some enrolled student with
    /// two subjects from that teacher.
    TeacherConflict,
    /// Changing a subject's credits would push some enrolled student over
    /// the credit cap.
    CreditChange { limit: i32 },
}

impl Display for Refusal {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Refusal::AlreadyEnrolled => write!(f, "already enrolled in this subject"),
            Refusal::SameTeacher => write!(
                f, "already enrolled in another subject from the same teacher"
            ),
            Refusal::SubjectLimit(n) => write!(
                f, "subject limit reached ({} subjects)", n
            ),
            Refusal::CreditLimit { total, limit } => write!(
                f, "credit limit exceeded ({} of {} credits)", total, limit
            ),
            Refusal::NotEnrolled => write!(f, "not enrolled in this subject"),
            Refusal::TeacherSubjectLimit(n) => write!(
                f, "teacher subject limit reached ({} subjects)", n
            ),
            Refusal::TeacherConflict => write!(
                f, "an enrolled student already has another subject from that teacher"
            ),
            Refusal::CreditChange { limit } => write!(
                f, "new credit value would put an enrolled student over {} credits", limit
            ),
        }
    }
}

/**
Decide whether a student holding `load` may enroll in `seat`.

Checks run in a fixed order and the first failure wins: duplicate
enrollment, same teacher, subject count, then credit total.
*/
pub fn check_enroll(limits: &Limits, load: &Load, seat: &Seat) -> Result<(), Refusal> {
    if load.holds(seat.subject) {
        return Err(Refusal::AlreadyEnrolled);
    }
    if let Some(teacher) = seat.teacher {
        if load.holds_teacher(teacher, seat.subject) {
            return Err(Refusal::SameTeacher);
        }
    }
    if load.count() >= limits.max_subjects {
        return Err(Refusal::SubjectLimit(limits.max_subjects));
    }
    let total = load.total_credits() + i64::from(seat.credits);
    if total > i64::from(limits.max_credits) {
        return Err(Refusal::CreditLimit { total, limit: limits.max_credits });
    }

    Ok(())
}

/// `check_enroll()` as a yes/no answer, for marking subjects a student
/// cannot take.
pub fn can_enroll(limits: &Limits, load: &Load, seat: &Seat) -> bool {
    check_enroll(limits, load, seat).is_ok()
}

pub fn check_drop(load: &Load, subject: i64) -> Result<Seat, Refusal> {
    load.seat(subject).copied().ok_or(Refusal::NotEnrolled)
}

/// `owned` is how many subjects the teacher owns, not counting the one being
/// assigned.
pub fn check_teacher_capacity(limits: &Limits, owned: usize) -> Result<(), Refusal> {
    if owned >= limits.max_teacher_subjects {
        Err(Refusal::TeacherSubjectLimit(limits.max_teacher_subjects))
    } else {
        Ok(())
    }
}

/// `rosters` holds the load of every student enrolled in `subject`.
pub fn check_reassignment(
    teacher: i64,
    subject: i64,
    rosters: &[Load],
) -> Result<(), Refusal> {
    if rosters.iter().any(|load| load.holds_teacher(teacher, subject)) {
        Err(Refusal::TeacherConflict)
    } else {
        Ok(())
    }
}

/// `rosters` holds the load of every student enrolled in `subject`.
pub fn check_credit_change(
    limits: &Limits,
    subject: i64,
    credits: i32,
    rosters: &[Load],
) -> Result<(), Refusal> {
    for load in rosters.iter() {
        let old = load.seat(subject).map(|s| i64::from(s.credits)).unwrap_or(0);
        if load.total_credits() - old + i64::from(credits) > i64::from(limits.max_credits) {
            return Err(Refusal::CreditChange { limit: limits.max_credits });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn seat(subject: i64, credits: i32, teacher: Option<i64>) -> Seat {
        Seat { subject, credits, teacher }
    }

    #[test]
    fn first_enrollment() {
        let limits = Limits::default();
        let mut load = Load::default();

        load.enroll(&limits, seat(1, 3, Some(10))).unwrap();
        assert_eq!((load.count(), load.total_credits()), (1, 3));
    }

    #[test]
    fn same_teacher_refused() {
        let limits = Limits::default();
        let mut load = Load::default();
        load.enroll(&limits, seat(1, 3, Some(10))).unwrap();

        assert_eq!(
            load.enroll(&limits, seat(2, 4, Some(10))),
            Err(Refusal::SameTeacher)
        );
        assert_eq!((load.count(), load.total_credits()), (1, 3));
    }

    #[test]
    fn unassigned_subjects_never_clash() {
        let limits = Limits::default();
        let mut load = Load::default();
        load.enroll(&limits, seat(1, 3, None)).unwrap();
        load.enroll(&limits, seat(2, 3, None)).unwrap();
        assert_eq!(load.count(), 2);
    }

    #[test]
    fn fourth_subject_refused() {
        let limits = Limits::default();
        let mut load = Load::default();
        for n in 1..=3 {
            load.enroll(&limits, seat(n, 2, Some(n * 10))).unwrap();
        }

        assert_eq!(
            load.enroll(&limits, seat(4, 2, Some(40))),
            Err(Refusal::SubjectLimit(3))
        );
        assert_eq!(load.count(), 3);
    }

    #[test]
    fn credit_cap() {
        let limits = Limits::default();
        let mut load = Load::default();
        load.enroll(&limits, seat(1, 10, Some(1))).unwrap();
        load.enroll(&limits, seat(2, 10, Some(2))).unwrap();

        assert_eq!(
            load.enroll(&limits, seat(3, 2, Some(3))),
            Err(Refusal::CreditLimit { total: 22, limit: 21 })
        );
        load.enroll(&limits, seat(3, 1, Some(3))).unwrap();
        assert_eq!(load.total_credits(), 21);
    }

    #[test]
    fn refusal_order() {
        let limits = Limits::default();
        let load = Load::new(vec![
            seat(1, 7, Some(1)),
            seat(2, 7, Some(2)),
            seat(3, 7, Some(3)),
        ]);

        // Duplicate beats everything else.
        assert_eq!(check_enroll(&limits, &load, &seat(1, 7, Some(1))), Err(Refusal::AlreadyEnrolled));
        // Same teacher beats the subject count.
        assert_eq!(check_enroll(&limits, &load, &seat(4, 1, Some(2))), Err(Refusal::SameTeacher));
        // Subject count beats credits.
        assert_eq!(check_enroll(&limits, &load, &seat(4, 9, Some(4))), Err(Refusal::SubjectLimit(3)));
        assert!(!can_enroll(&limits, &load, &seat(4, 1, None)));
    }

    #[test]
    fn drop_not_enrolled() {
        let limits = Limits::default();
        let mut load = Load::default();
        load.enroll(&limits, seat(1, 3, Some(1))).unwrap();
        let before = load.clone();

        assert_eq!(load.drop_subject(2), Err(Refusal::NotEnrolled));
        assert_eq!(load, before);
    }

    #[test]
    fn teacher_capacity() {
        let limits = Limits::default();
        assert!(check_teacher_capacity(&limits, 0).is_ok());
        assert!(check_teacher_capacity(&limits, 1).is_ok());
        assert_eq!(
            check_teacher_capacity(&limits, 2),
            Err(Refusal::TeacherSubjectLimit(2))
        );
    }

    #[test]
    fn reassignment_conflict() {
        // Student holds subject 1 (teacher 7) and subject 2 (teacher 8).
        let rosters = vec![Load::new(vec![seat(1, 3, Some(7)), seat(2, 3, Some(8))])];

        assert_eq!(check_reassignment(8, 1, &rosters), Err(Refusal::TeacherConflict));
        assert!(check_reassignment(9, 1, &rosters).is_ok());
        // Reassigning to its current teacher is fine.
        assert!(check_reassignment(7, 1, &rosters).is_ok());
    }

    #[test]
    fn credit_change() {
        let limits = Limits::default();
        let rosters = vec![
            Load::new(vec![seat(1, 5, None), seat(2, 10, None)]),
            Load::new(vec![seat(1, 5, None)]),
        ];

        assert!(check_credit_change(&limits, 1, 11, &rosters).is_ok());
        assert_eq!(
            check_credit_change(&limits, 1, 12, &rosters),
            Err(Refusal::CreditChange { limit: 21 })
        );
    }

    #[test]
    fn huge_credit_values_are_refused() {
        let limits = Limits::default();
        let mut load = Load::new(vec![seat(1, 3, None)]);

        assert_eq!(
            load.enroll(&limits, seat(2, i32::MAX, None)),
            Err(Refusal::CreditLimit { total: 3 + i32::MAX as i64, limit: 21 })
        );
        assert_eq!((load.count(), load.total_credits()), (1, 3));
        assert!(!can_enroll(&limits, &load, &seat(2, i32::MAX, None)));

        let full = Load::new(vec![seat(1, i32::MAX, None), seat(2, i32::MAX, None)]);
        assert_eq!(full.total_credits(), 2 * i32::MAX as i64);

        let rosters = vec![load.clone()];
        assert_eq!(
            check_credit_change(&limits, 1, i32::MAX, &rosters),
            Err(Refusal::CreditChange { limit: 21 })
        );
    }

    #[derive(Clone, Debug)]
    enum Op {
        Enroll(usize),
        Drop(usize),
    }

    fn arb_catalog() -> impl Strategy<Value = Vec<Seat>> {
        prop::collection::vec((1..=8i32, prop::option::of(0..4i64)), 1..10)
            .prop_map(|v| v.into_iter()
                .enumerate()
                .map(|(n, (credits, teacher))| seat(n as i64, credits, teacher))
                .collect())
    }

    fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
        prop::collection::vec(
            prop_oneof![
                (0..10usize).prop_map(Op::Enroll),
                (0..10usize).prop_map(Op::Drop),
            ],
            0..40
        )
    }

    fn assert_invariants(limits: &Limits, load: &Load) {
        assert!(load.count() <= limits.max_subjects);
        assert!(load.total_credits() <= i64::from(limits.max_credits));
        let expected: i64 = load.seats().iter().map(|s| s.credits as i64).sum();
        assert_eq!(load.total_credits(), expected);

        let teachers: Vec<i64> = load.seats().iter().filter_map(|s| s.teacher).collect();
        for (n, t) in teachers.iter().enumerate() {
            assert!(!teachers[n + 1..].contains(t), "teacher {} held twice", t);
        }
    }

    proptest! {
        #[test]
        fn invariants_hold_over_any_sequence(catalog in arb_catalog(), ops in arb_ops()) {
            let limits = Limits::default();
            let mut load = Load::default();

            for op in ops.iter() {
                let before = load.clone();
                match op {
                    Op::Enroll(n) => {
                        let s = catalog[n % catalog.len()];
                        if load.enroll(&limits, s).is_err() {
                            prop_assert_eq!(&load, &before);
                        }
                    },
                    Op::Drop(n) => {
                        let s = catalog[n % catalog.len()];
                        if load.drop_subject(s.subject).is_err() {
                            prop_assert_eq!(&load, &before);
                        }
                    },
                }
                assert_invariants(&limits, &load);
            }
        }

        #[test]
        fn enroll_then_drop_round_trips(catalog in arb_catalog(), pick in 0..10usize) {
            let limits = Limits::default();
            let mut load = Load::default();
            // Fill up with whatever the rules allow first.
            for s in catalog.iter().skip(1) {
                let _ = load.enroll(&limits, *s);
            }
            let (count, credits) = (load.count(), load.total_credits());

            let s = catalog[pick % catalog.len()];
            if load.enroll(&limits, s).is_ok() {
                load.drop_subject(s.subject).unwrap();
            }
            prop_assert_eq!((load.count(), load.total_credits()), (count, credits));
        }
    }
}
