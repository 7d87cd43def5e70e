use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Monetary amount in minor units
pub type Amount = u64;

/// Identifier of an authenticated principal
pub type UserId = String;

/// Identifier assigned by the bet store
pub type BetId = String;

/// Unique per session; regenerated on every reset
pub type SessionId = Uuid;

/// The two betting outcomes of a round
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Side A, the inner side; dealt second in every round
    Andar,
    /// Side B, the outer side; dealt first in every round
    Bahar,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Andar => Side::Bahar,
            Side::Bahar => Side::Andar,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Andar => write!(f, "andar"),
            Side::Bahar => write!(f, "bahar"),
        }
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "andar" | "a" | "inner" | "inside" => Ok(Side::Andar),
            "bahar" | "b" | "outer" | "outside" => Ok(Side::Bahar),
            other => Err(format!("unknown side '{}'", other)),
        }
    }
}

/// Betting-then-dealing cycle number; round 3 is deal-only
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(into = "u8", try_from = "u8")]
pub enum Round {
    First,
    Second,
    /// Continuous draw until a winning card appears
    Continuous,
}

impl Round {
    pub fn number(self) -> u8 {
        match self {
            Round::First => 1,
            Round::Second => 2,
            Round::Continuous => 3,
        }
    }

    /// Whether players may stake in this round at all
    pub fn accepts_bets(self) -> bool {
        !matches!(self, Round::Continuous)
    }

    pub fn next(self) -> Self {
        match self {
            Round::First => Round::Second,
            Round::Second | Round::Continuous => Round::Continuous,
        }
    }
}

impl From<Round> for u8 {
    fn from(round: Round) -> Self {
        round.number()
    }
}

impl TryFrom<u8> for Round {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Round::First),
            2 => Ok(Round::Second),
            3 => Ok(Round::Continuous),
            other => Err(format!("round must be 1, 2 or 3 (got {})", other)),
        }
    }
}

impl fmt::Display for Round {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Session phase; governs which commands are legal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Betting,
    Dealing,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => write!(f, "idle"),
            Phase::Betting => write!(f, "betting"),
            Phase::Dealing => write!(f, "dealing"),
            Phase::Complete => write!(f, "complete"),
        }
    }
}

/// Role of an already-authenticated principal
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Player,
    Operator,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Player => write!(f, "player"),
            Role::Operator => write!(f, "operator"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "player" => Ok(Role::Player),
            "operator" | "admin" => Ok(Role::Operator),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// Caller identity attached to every command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn player(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Player,
        }
    }

    pub fn operator(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Operator,
        }
    }

    pub fn is_operator(&self) -> bool {
        self.role == Role::Operator
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Suit {
    Spades,
    Hearts,
    Diamonds,
    Clubs,
}

impl Suit {
    fn symbol(self) -> char {
        match self {
            Suit::Spades => '♠',
            Suit::Hearts => '♥',
            Suit::Diamonds => '♦',
            Suit::Clubs => '♣',
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "s" | "♠" | "spades" => Some(Suit::Spades),
            "h" | "♥" | "hearts" => Some(Suit::Hearts),
            "d" | "♦" | "diamonds" => Some(Suit::Diamonds),
            "c" | "♣" | "clubs" => Some(Suit::Clubs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Ace,
    Two,
    Three,
    Four,
    Five,
    Six,
    Seven,
    Eight,
    Nine,
    Ten,
    Jack,
    Queen,
    King,
}

impl Rank {
    fn label(self) -> &'static str {
        match self {
            Rank::Ace => "A",
            Rank::Two => "2",
            Rank::Three => "3",
            Rank::Four => "4",
            Rank::Five => "5",
            Rank::Six => "6",
            Rank::Seven => "7",
            Rank::Eight => "8",
            Rank::Nine => "9",
            Rank::Ten => "10",
            Rank::Jack => "J",
            Rank::Queen => "Q",
            Rank::King => "K",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "A" | "1" => Some(Rank::Ace),
            "2" => Some(Rank::Two),
            "3" => Some(Rank::Three),
            "4" => Some(Rank::Four),
            "5" => Some(Rank::Five),
            "6" => Some(Rank::Six),
            "7" => Some(Rank::Seven),
            "8" => Some(Rank::Eight),
            "9" => Some(Rank::Nine),
            "10" | "T" => Some(Rank::Ten),
            "J" => Some(Rank::Jack),
            "Q" => Some(Rank::Queen),
            "K" => Some(Rank::King),
            _ => None,
        }
    }
}

/// A playing card; serialized as e.g. `"7♠"`, parsed from `"7S"`, `"10h"`, `"Q♦"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Card {
    pub rank: Rank,
    pub suit: Suit,
}

impl Card {
    pub fn new(rank: Rank, suit: Suit) -> Self {
        Self { rank, suit }
    }

    /// Win rule: ranks match, suits are irrelevant
    pub fn matches_rank(&self, other: &Card) -> bool {
        self.rank == other.rank
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.rank.label(), self.suit.symbol())
    }
}

impl FromStr for Card {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let Some(last) = trimmed.chars().last() else {
            return Err("empty card".to_string());
        };
        let split = trimmed.len() - last.len_utf8();
        let (rank, suit) = trimmed.split_at(split);
        let rank = Rank::parse(rank).ok_or_else(|| format!("unknown rank in '{}'", trimmed))?;
        let suit = Suit::parse(suit).ok_or_else(|| format!("unknown suit in '{}'", trimmed))?;
        Ok(Card { rank, suit })
    }
}

impl From<Card> for String {
    fn from(card: Card) -> Self {
        card.to_string()
    }
}

impl TryFrom<String> for Card {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Stakes on both sides for a single round
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SideStakes {
    pub andar: Amount,
    pub bahar: Amount,
}

impl SideStakes {
    pub fn get(&self, side: Side) -> Amount {
        match side {
            Side::Andar => self.andar,
            Side::Bahar => self.bahar,
        }
    }

    pub fn add(&mut self, side: Side, amount: Amount) {
        match side {
            Side::Andar => self.andar += amount,
            Side::Bahar => self.bahar += amount,
        }
    }

    pub fn total(&self) -> Amount {
        self.andar + self.bahar
    }
}

/// One user's position across the two betting rounds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserStakes {
    pub round1: SideStakes,
    pub round2: SideStakes,
}

impl UserStakes {
    pub fn round(&self, round: Round) -> Option<&SideStakes> {
        match round {
            Round::First => Some(&self.round1),
            Round::Second => Some(&self.round2),
            Round::Continuous => None,
        }
    }

    /// Adds to a betting round; returns false for round 3, which holds no stakes
    pub fn add(&mut self, round: Round, side: Side, amount: Amount) -> bool {
        match round {
            Round::First => self.round1.add(side, amount),
            Round::Second => self.round2.add(side, amount),
            Round::Continuous => return false,
        }
        true
    }

    pub fn on_side(&self, side: Side) -> Amount {
        self.round1.get(side) + self.round2.get(side)
    }

    pub fn total(&self) -> Amount {
        self.round1.total() + self.round2.total()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
