//! Общие константы форматирования и имена колонок датасета, чтобы не дублировать строки.

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const UNIT_CELSIUS: &str = "°C";

pub const COLUMN_ENTITY: &str = "Entity";
pub const COLUMN_CONTINENT: &str = "Continent";
pub const COLUMN_YEAR: &str = "year";
pub const COLUMN_DAY: &str = "Day";
pub const COLUMN_MONTH: &str = "month";
pub const COLUMN_MONTHLY_TEMPERATURE: &str = "Average surface temperature month";
pub const COLUMN_ANNUAL_TEMPERATURE: &str = "Average surface temperature year";

pub const MONTHS_PER_YEAR: u32 = 12;
pub const DEFAULT_END_YEAR: i32 = 2030;
