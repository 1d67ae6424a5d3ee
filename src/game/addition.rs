//! Addition quiz: question generation, in-progress quizzes, scoring and the
//! once-per-day session record.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::calendar::{closed_reason, GameClock, HolidayLookup};
use crate::config::{QUIZ_OPERAND_MAX, QUIZ_OPERAND_MIN, QUIZ_QUESTION_COUNT, QUIZ_SUBMIT_GRACE_MS};
use crate::db::store;
use crate::error::{AppError, Result};
use crate::game::PerPlayer;
use crate::realtime::Realtime;
use crate::types::{ChangeAction, GameSession, Player, Question, QuestionResult, Settings, Table};

pub fn generate_questions<R: Rng + ?Sized>(rng: &mut R, count: usize) -> Vec<Question> {
    (0..count)
        .map(|_| {
            let num1 = rng.gen_range(QUIZ_OPERAND_MIN..=QUIZ_OPERAND_MAX);
            let num2 = rng.gen_range(QUIZ_OPERAND_MIN..=QUIZ_OPERAND_MAX);
            Question { num1, num2, answer: num1 + num2 }
        })
        .collect()
}

/// What the player sees: the operands, never the answer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Prompt {
    pub num1: u32,
    pub num2: u32,
}

impl From<&Question> for Prompt {
    fn from(q: &Question) -> Self {
        Self { num1: q.num1, num2: q.num2 }
    }
}

/// One submitted answer, in question order.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Answer {
    pub user_answer: u32,
    /// Seconds since the previous answer (or quiz start).
    pub time_taken: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
    pub score: i64,
    pub wrong: i64,
    pub results: Vec<QuestionResult>,
}

impl Scored {
    pub fn earnings(&self) -> i64 {
        self.score - self.wrong
    }
}

/// Score answers against questions. Answers whose cumulative time runs past
/// `limit` are discarded, as are answers beyond the last question.
pub fn score_answers(questions: &[Question], answers: &[Answer], limit: Duration) -> Scored {
    let limit = limit.as_secs_f64();
    let mut elapsed = 0.0;
    let mut scored = Scored { score: 0, wrong: 0, results: Vec::new() };

    for (q, a) in questions.iter().zip(answers) {
        elapsed += a.time_taken.max(0.0);
        if elapsed > limit {
            break;
        }
        let is_correct = a.user_answer == q.answer;
        if is_correct {
            scored.score += 1;
        } else {
            scored.wrong += 1;
        }
        scored.results.push(QuestionResult {
            num1: q.num1,
            num2: q.num2,
            answer: q.answer,
            user_answer: a.user_answer,
            is_correct,
            time_taken: Some(a.time_taken),
        });
    }
    scored
}

// ---------------------------------------------------------------------------
// Quiz lifecycle
// ---------------------------------------------------------------------------

struct ActiveQuiz {
    day: NaiveDate,
    started: Instant,
    questions: Vec<Question>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuizStarted {
    pub player: Player,
    pub day: NaiveDate,
    pub duration_secs: u64,
    pub questions: Vec<Prompt>,
}

/// Quizzes in progress, at most one per player.
///
/// The server clock is the authority on the time limit: a submission that
/// arrives later than `duration + grace` after the start scores nothing,
/// whatever per-answer times the client reports.
pub struct QuizBook {
    active: DashMap<Player, ActiveQuiz>,
    duration: Duration,
    grace: Duration,
}

impl QuizBook {
    pub fn new(duration: Duration) -> Self {
        Self {
            active: DashMap::new(),
            duration,
            grace: Duration::from_millis(QUIZ_SUBMIT_GRACE_MS),
        }
    }

    #[cfg(test)]
    fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Drop every quiz in progress. Returns how many were dropped.
    pub fn clear(&self) -> usize {
        let n = self.active.len();
        self.active.clear();
        n
    }

    /// Prompts of the player's quiz in progress, if one is running.
    pub fn prompts(&self, player: Player) -> Option<QuizStarted> {
        let quiz = self.active.get(&player)?;
        Some(QuizStarted {
            player,
            day: quiz.day,
            duration_secs: self.duration.as_secs(),
            questions: quiz.questions.iter().map(Prompt::from).collect(),
        })
    }

    /// Start a quiz. Starting again before finishing replaces the old quiz.
    pub async fn start<H: HolidayLookup + ?Sized>(
        &self,
        pool: &SqlitePool,
        settings: &Settings,
        holidays: &H,
        now: NaiveDateTime,
        player: Player,
    ) -> Result<QuizStarted> {
        if !settings.addition_enabled {
            return Err(AppError::Forbidden("the addition game is disabled".to_string()));
        }
        let day = now.date();
        if let Some(reason) = closed_reason(day, holidays) {
            return Err(AppError::Forbidden(format!("no games on {day}: {reason:?}")));
        }
        if store::session_for_day(pool, player, day).await?.is_some() {
            return Err(AppError::Conflict(format!("{player} already played on {day}")));
        }

        let questions = generate_questions(&mut rand::thread_rng(), QUIZ_QUESTION_COUNT);
        let started = QuizStarted {
            player,
            day,
            duration_secs: self.duration.as_secs(),
            questions: questions.iter().map(Prompt::from).collect(),
        };
        self.active.insert(player, ActiveQuiz { day, started: Instant::now(), questions });
        info!(%player, %day, "Quiz started");
        Ok(started)
    }

    /// Finish the player's quiz, score it and record the session.
    pub async fn finish(
        &self,
        pool: &SqlitePool,
        realtime: &Realtime,
        clock: &GameClock,
        settings: &Settings,
        now: NaiveDateTime,
        player: Player,
        answers: &[Answer],
    ) -> Result<GameSession> {
        if !settings.addition_enabled {
            return Err(AppError::Forbidden("the addition game is disabled".to_string()));
        }
        let (_, quiz) = self
            .active
            .remove(&player)
            .ok_or_else(|| AppError::NotFound(format!("{player} has no quiz in progress")))?;

        let wall = quiz.started.elapsed();
        let scored = if wall > self.duration + self.grace {
            warn!(
                %player,
                wall_secs = wall.as_secs_f64(),
                limit_secs = self.duration.as_secs_f64(),
                "Late quiz submission, answers discarded"
            );
            score_answers(&quiz.questions, &[], self.duration)
        } else {
            score_answers(&quiz.questions, answers, self.duration)
        };
        let session = GameSession {
            id: uuid::Uuid::new_v4().to_string(),
            player,
            score: scored.score,
            wrong: scored.wrong,
            earnings: scored.earnings(),
            timestamp: clock.to_epoch_ms(now),
            day: quiz.day,
            results: Some(scored.results),
        };
        match store::insert_session(pool, &session).await {
            Ok(()) => {}
            // The day is already on record; a retry cannot succeed.
            Err(e @ AppError::Conflict(_)) => return Err(e),
            Err(e) => {
                // Keep the quiz so the player can resubmit, unless a new one
                // was started meanwhile.
                self.active.entry(player).or_insert(quiz);
                return Err(e);
            }
        }
        realtime.publish(Table::AdditionLogs, ChangeAction::Insert, &session);

        info!(
            %player,
            score = session.score,
            wrong = session.wrong,
            earnings = session.earnings,
            wall_secs = wall.as_secs_f64(),
            "Quiz finished"
        );
        Ok(session)
    }
}

// ---------------------------------------------------------------------------
// Daily view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyEarnings {
    pub date: NaiveDate,
    pub earnings: PerPlayer<i64>,
}

/// Sum session earnings per day and player, newest day first.
pub fn group_by_day(sessions: &[GameSession]) -> Vec<DailyEarnings> {
    let mut days: BTreeMap<NaiveDate, PerPlayer<i64>> = BTreeMap::new();
    for s in sessions {
        let slot = days.entry(s.day).or_default().slot_mut(s.player);
        *slot = Some(slot.unwrap_or(0) + s.earnings);
    }
    days.into_iter()
        .rev()
        .map(|(date, earnings)| DailyEarnings { date, earnings })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_pool;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M").unwrap()
    }

    fn q(num1: u32, num2: u32) -> Question {
        Question { num1, num2, answer: num1 + num2 }
    }

    fn ans(user_answer: u32, time_taken: f64) -> Answer {
        Answer { user_answer, time_taken }
    }

    #[test]
    fn questions_use_two_digit_operands() {
        let qs = generate_questions(&mut StdRng::seed_from_u64(7), QUIZ_QUESTION_COUNT);
        assert_eq!(qs.len(), 100);
        for q in qs {
            assert!((10..=99).contains(&q.num1) && (10..=99).contains(&q.num2));
            assert_eq!(q.answer, q.num1 + q.num2);
        }
    }

    #[test]
    fn earnings_are_score_minus_wrong() {
        let qs = [q(10, 20), q(33, 44), q(50, 50)];
        let scored = score_answers(&qs, &[ans(30, 1.0), ans(70, 1.5), ans(100, 2.0)], Duration::from_secs(10));
        assert_eq!((scored.score, scored.wrong), (2, 1));
        assert_eq!(scored.earnings(), 1);
        assert!(!scored.results[1].is_correct);
        assert_eq!(scored.results[1].answer, 77);
    }

    #[test]
    fn answers_after_time_limit_do_not_count() {
        let qs = [q(10, 20), q(11, 22), q(12, 24)];
        let scored = score_answers(&qs, &[ans(30, 4.0), ans(33, 5.0), ans(36, 2.0)], Duration::from_secs(10));
        assert_eq!(scored.results.len(), 2);
        assert_eq!(scored.score, 2);
    }

    #[test]
    fn extra_answers_are_ignored() {
        let scored = score_answers(&[q(10, 10)], &[ans(20, 0.5), ans(1, 0.5)], Duration::from_secs(10));
        assert_eq!(scored.results.len(), 1);
    }

    #[test]
    fn daily_grouping_sums_per_player() {
        let mk = |player, day: &str, earnings| GameSession {
            id: uuid::Uuid::new_v4().to_string(),
            player,
            score: 0,
            wrong: 0,
            earnings,
            timestamp: 0,
            day: d(day),
            results: None,
        };
        let days = group_by_day(&[
            mk(Player::Ayaan, "2025-03-12", 5),
            mk(Player::Riyaan, "2025-03-13", -2),
            mk(Player::Ayaan, "2025-03-13", 7),
        ]);
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, d("2025-03-13"));
        assert_eq!(days[0].earnings.get(Player::Riyaan), Some(&-2));
        assert_eq!(days[1].earnings.get(Player::Riyaan), None);
    }

    #[tokio::test]
    async fn play_once_per_day() {
        let pool = test_pool().await;
        let book = QuizBook::new(Duration::from_secs(10));
        let rt = Realtime::new(8);
        let clock = GameClock::new(330);
        let settings = Settings::default();
        let none: HashSet<NaiveDate> = HashSet::new();
        let now = at("2025-03-13 18:00");

        let started = book.start(&pool, &settings, &none, now, Player::Ayaan).await.unwrap();
        assert_eq!(started.questions.len(), 100);
        assert!(book.prompts(Player::Ayaan).is_some());

        let session = book
            .finish(&pool, &rt, &clock, &settings, now, Player::Ayaan, &[])
            .await
            .unwrap();
        assert_eq!(session.earnings, 0);
        assert!(book.prompts(Player::Ayaan).is_none());

        let err = book.start(&pool, &settings, &none, now, Player::Ayaan).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(book.start(&pool, &settings, &none, now, Player::Riyaan).await.is_ok());
    }

    fn correct_answers(book: &QuizBook, player: Player) -> Vec<Answer> {
        let quiz = book.active.get(&player).unwrap();
        quiz.questions.iter().map(|q| ans(q.answer, 0.0)).collect()
    }

    #[tokio::test]
    async fn late_submission_scores_zero() {
        let pool = test_pool().await;
        let book = QuizBook::new(Duration::from_millis(100)).with_grace(Duration::from_millis(50));
        let rt = Realtime::new(8);
        let clock = GameClock::new(330);
        let settings = Settings::default();
        let none: HashSet<NaiveDate> = HashSet::new();

        book.start(&pool, &settings, &none, at("2025-03-13 18:00"), Player::Ayaan).await.unwrap();
        let answers = correct_answers(&book, Player::Ayaan);
        tokio::time::sleep(Duration::from_millis(300)).await;

        let session = book
            .finish(&pool, &rt, &clock, &settings, at("2025-03-13 18:01"), Player::Ayaan, &answers)
            .await
            .unwrap();
        assert_eq!((session.score, session.wrong, session.earnings), (0, 0, 0));

        // Same answers in time count in full.
        book.start(&pool, &settings, &none, at("2025-03-14 18:00"), Player::Ayaan).await.unwrap();
        let answers = correct_answers(&book, Player::Ayaan);
        let session = book
            .finish(&pool, &rt, &clock, &settings, at("2025-03-14 18:00"), Player::Ayaan, &answers)
            .await
            .unwrap();
        assert_eq!(session.score, 100);
    }

    #[tokio::test]
    async fn failed_save_keeps_quiz() {
        let pool = test_pool().await;
        let book = QuizBook::new(Duration::from_secs(10));
        let settings = Settings::default();
        let none: HashSet<NaiveDate> = HashSet::new();
        book.start(&pool, &settings, &none, at("2025-03-13 18:00"), Player::Riyaan).await.unwrap();

        pool.close().await;
        let err = book
            .finish(&pool, &Realtime::new(4), &GameClock::new(330), &settings, at("2025-03-13 18:00"), Player::Riyaan, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)), "got {err:?}");
        assert!(book.prompts(Player::Riyaan).is_some());
    }

    #[tokio::test]
    async fn closed_days_and_toggle_block_start() {
        let pool = test_pool().await;
        let book = QuizBook::new(Duration::from_secs(10));
        let none: HashSet<NaiveDate> = HashSet::new();

        let err = book
            .start(&pool, &Settings::default(), &none, at("2025-03-15 10:00"), Player::Ayaan)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let off = Settings { addition_enabled: false, ..Settings::default() };
        let err = book.start(&pool, &off, &none, at("2025-03-13 10:00"), Player::Ayaan).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[tokio::test]
    async fn finish_without_start_is_not_found() {
        let pool = test_pool().await;
        let book = QuizBook::new(Duration::from_secs(10));
        let err = book
            .finish(&pool, &Realtime::new(4), &GameClock::new(330), &Settings::default(), at("2025-03-13 10:00"), Player::Riyaan, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
