//! BIFF8 built-in function table
//!
//! Function calls are stored by their index into Excel's fixed function
//! table (`iftab`). Functions whose minimum and maximum argument counts are
//! equal are written as `PtgFunc`, everything else as `PtgFuncVar` with an
//! explicit argument count.

use ahash::AHashMap;
use once_cell::sync::Lazy;

/// Upper bound on arguments to a variable-arity function in BIFF8
pub const MAX_FUNCTION_ARGS: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionSpec {
    pub index: u16,
    pub name: &'static str,
    pub min_args: u8,
    pub max_args: u8,
    /// Recalculated on every calculation pass (NOW, RAND, OFFSET, ...)
    pub volatile: bool,
}

impl FunctionSpec {
    /// Whether calls are written with a fixed argument count (`PtgFunc`)
    pub fn is_fixed_arity(&self) -> bool {
        self.min_args == self.max_args
    }

    /// Whether `argc` arguments are acceptable
    pub fn accepts(&self, argc: usize) -> bool {
        argc >= self.min_args as usize && argc <= self.max_args as usize
    }

    /// Human-readable argument count for error messages
    pub fn arity_text(&self) -> String {
        if self.is_fixed_arity() {
            self.min_args.to_string()
        } else {
            format!("{}..{}", self.min_args, self.max_args)
        }
    }
}

const fn f(index: u16, name: &'static str, min_args: u8, max_args: u8) -> FunctionSpec {
    FunctionSpec {
        index,
        name,
        min_args,
        max_args,
        volatile: false,
    }
}

const fn volatile(index: u16, name: &'static str, min_args: u8, max_args: u8) -> FunctionSpec {
    FunctionSpec {
        index,
        name,
        min_args,
        max_args,
        volatile: true,
    }
}

const V: u8 = MAX_FUNCTION_ARGS;

pub(crate) const FUNCTION_SPECS: &[FunctionSpec] = &[
    f(0, "COUNT", 0, V),
    f(1, "IF", 2, 3),
    f(2, "ISNA", 1, 1),
    f(3, "ISERROR", 1, 1),
    f(4, "SUM", 0, V),
    f(5, "AVERAGE", 1, V),
    f(6, "MIN", 1, V),
    f(7, "MAX", 1, V),
    f(8, "ROW", 0, 1),
    f(9, "COLUMN", 0, 1),
    f(10, "NA", 0, 0),
    f(11, "NPV", 2, V),
    f(12, "STDEV", 1, V),
    f(13, "DOLLAR", 1, 2),
    f(14, "FIXED", 1, 3),
    f(15, "SIN", 1, 1),
    f(16, "COS", 1, 1),
    f(17, "TAN", 1, 1),
    f(18, "ATAN", 1, 1),
    f(19, "PI", 0, 0),
    f(20, "SQRT", 1, 1),
    f(21, "EXP", 1, 1),
    f(22, "LN", 1, 1),
    f(23, "LOG10", 1, 1),
    f(24, "ABS", 1, 1),
    f(25, "INT", 1, 1),
    f(26, "SIGN", 1, 1),
    f(27, "ROUND", 2, 2),
    f(28, "LOOKUP", 2, 3),
    f(29, "INDEX", 2, 4),
    f(30, "REPT", 2, 2),
    f(31, "MID", 3, 3),
    f(32, "LEN", 1, 1),
    f(33, "VALUE", 1, 1),
    f(34, "TRUE", 0, 0),
    f(35, "FALSE", 0, 0),
    f(36, "AND", 1, V),
    f(37, "OR", 1, V),
    f(38, "NOT", 1, 1),
    f(39, "MOD", 2, 2),
    f(40, "DCOUNT", 3, 3),
    f(41, "DSUM", 3, 3),
    f(42, "DAVERAGE", 3, 3),
    f(43, "DMIN", 3, 3),
    f(44, "DMAX", 3, 3),
    f(45, "DSTDEV", 3, 3),
    f(46, "VAR", 1, V),
    f(47, "DVAR", 3, 3),
    f(48, "TEXT", 2, 2),
    f(49, "LINEST", 1, 4),
    f(50, "TREND", 1, 4),
    f(51, "LOGEST", 1, 4),
    f(52, "GROWTH", 1, 4),
    f(56, "PV", 3, 5),
    f(57, "FV", 3, 5),
    f(58, "NPER", 3, 5),
    f(59, "PMT", 3, 5),
    f(60, "RATE", 3, 6),
    f(61, "MIRR", 3, 3),
    f(62, "IRR", 1, 2),
    volatile(63, "RAND", 0, 0),
    f(64, "MATCH", 2, 3),
    f(65, "DATE", 3, 3),
    f(66, "TIME", 3, 3),
    f(67, "DAY", 1, 1),
    f(68, "MONTH", 1, 1),
    f(69, "YEAR", 1, 1),
    f(70, "WEEKDAY", 1, 2),
    f(71, "HOUR", 1, 1),
    f(72, "MINUTE", 1, 1),
    f(73, "SECOND", 1, 1),
    volatile(74, "NOW", 0, 0),
    f(75, "AREAS", 1, 1),
    f(76, "ROWS", 1, 1),
    f(77, "COLUMNS", 1, 1),
    volatile(78, "OFFSET", 3, 5),
    f(82, "SEARCH", 2, 3),
    f(83, "TRANSPOSE", 1, 1),
    f(86, "TYPE", 1, 1),
    f(97, "ATAN2", 2, 2),
    f(98, "ASIN", 1, 1),
    f(99, "ACOS", 1, 1),
    f(100, "CHOOSE", 2, V),
    f(101, "HLOOKUP", 3, 4),
    f(102, "VLOOKUP", 3, 4),
    f(105, "ISREF", 1, 1),
    f(109, "LOG", 1, 2),
    f(111, "CHAR", 1, 1),
    f(112, "LOWER", 1, 1),
    f(113, "UPPER", 1, 1),
    f(114, "PROPER", 1, 1),
    f(115, "LEFT", 1, 2),
    f(116, "RIGHT", 1, 2),
    f(117, "EXACT", 2, 2),
    f(118, "TRIM", 1, 1),
    f(119, "REPLACE", 4, 4),
    f(120, "SUBSTITUTE", 3, 4),
    f(121, "CODE", 1, 1),
    f(124, "FIND", 2, 3),
    volatile(125, "CELL", 1, 2),
    f(126, "ISERR", 1, 1),
    f(127, "ISTEXT", 1, 1),
    f(128, "ISNUMBER", 1, 1),
    f(129, "ISBLANK", 1, 1),
    f(130, "T", 1, 1),
    f(131, "N", 1, 1),
    f(140, "DATEVALUE", 1, 1),
    f(141, "TIMEVALUE", 1, 1),
    f(142, "SLN", 3, 3),
    f(143, "SYD", 4, 4),
    f(144, "DDB", 4, 5),
    volatile(148, "INDIRECT", 1, 2),
    f(162, "CLEAN", 1, 1),
    f(163, "MDETERM", 1, 1),
    f(164, "MINVERSE", 1, 1),
    f(165, "MMULT", 2, 2),
    f(167, "IPMT", 4, 6),
    f(168, "PPMT", 4, 6),
    f(169, "COUNTA", 0, V),
    f(183, "PRODUCT", 0, V),
    f(184, "FACT", 1, 1),
    f(189, "DPRODUCT", 3, 3),
    f(190, "ISNONTEXT", 1, 1),
    f(193, "STDEVP", 1, V),
    f(194, "VARP", 1, V),
    f(195, "DSTDEVP", 3, 3),
    f(196, "DVARP", 3, 3),
    f(197, "TRUNC", 1, 2),
    f(198, "ISLOGICAL", 1, 1),
    f(199, "DCOUNTA", 3, 3),
    f(204, "USDOLLAR", 1, 2),
    f(205, "FINDB", 2, 3),
    f(206, "SEARCHB", 2, 3),
    f(207, "REPLACEB", 4, 4),
    f(208, "LEFTB", 1, 2),
    f(209, "RIGHTB", 1, 2),
    f(210, "MIDB", 3, 3),
    f(211, "LENB", 1, 1),
    f(212, "ROUNDUP", 2, 2),
    f(213, "ROUNDDOWN", 2, 2),
    f(214, "ASC", 1, 1),
    f(215, "DBCS", 1, 1),
    f(216, "RANK", 2, 3),
    f(219, "ADDRESS", 2, 5),
    f(220, "DAYS360", 2, 3),
    volatile(221, "TODAY", 0, 0),
    f(222, "VDB", 5, 7),
    f(227, "MEDIAN", 1, V),
    f(228, "SUMPRODUCT", 1, V),
    f(229, "SINH", 1, 1),
    f(230, "COSH", 1, 1),
    f(231, "TANH", 1, 1),
    f(232, "ASINH", 1, 1),
    f(233, "ACOSH", 1, 1),
    f(234, "ATANH", 1, 1),
    f(235, "DGET", 3, 3),
    volatile(244, "INFO", 1, 1),
    f(247, "DB", 4, 5),
    f(252, "FREQUENCY", 2, 2),
    f(261, "ERROR.TYPE", 1, 1),
    f(269, "AVEDEV", 1, V),
    f(270, "BETADIST", 3, 5),
    f(271, "GAMMALN", 1, 1),
    f(272, "BETAINV", 3, 5),
    f(273, "BINOMDIST", 4, 4),
    f(274, "CHIDIST", 2, 2),
    f(275, "CHIINV", 2, 2),
    f(276, "COMBIN", 2, 2),
    f(277, "CONFIDENCE", 3, 3),
    f(278, "CRITBINOM", 3, 3),
    f(279, "EVEN", 1, 1),
    f(280, "EXPONDIST", 3, 3),
    f(281, "FDIST", 3, 3),
    f(282, "FINV", 3, 3),
    f(283, "FISHER", 1, 1),
    f(284, "FISHERINV", 1, 1),
    f(285, "FLOOR", 2, 2),
    f(286, "GAMMADIST", 4, 4),
    f(287, "GAMMAINV", 3, 3),
    f(288, "CEILING", 2, 2),
    f(289, "HYPGEOMDIST", 4, 4),
    f(290, "LOGNORMDIST", 3, 3),
    f(291, "LOGINV", 3, 3),
    f(292, "NEGBINOMDIST", 3, 3),
    f(293, "NORMDIST", 4, 4),
    f(294, "NORMSDIST", 1, 1),
    f(295, "NORMINV", 3, 3),
    f(296, "NORMSINV", 1, 1),
    f(297, "STANDARDIZE", 3, 3),
    f(298, "ODD", 1, 1),
    f(299, "PERMUT", 2, 2),
    f(300, "POISSON", 3, 3),
    f(301, "TDIST", 3, 3),
    f(302, "WEIBULL", 4, 4),
    f(303, "SUMXMY2", 2, 2),
    f(304, "SUMX2MY2", 2, 2),
    f(305, "SUMX2PY2", 2, 2),
    f(306, "CHITEST", 2, 2),
    f(307, "CORREL", 2, 2),
    f(308, "COVAR", 2, 2),
    f(309, "FORECAST", 3, 3),
    f(310, "FTEST", 2, 2),
    f(311, "INTERCEPT", 2, 2),
    f(312, "PEARSON", 2, 2),
    f(313, "RSQ", 2, 2),
    f(314, "STEYX", 2, 2),
    f(315, "SLOPE", 2, 2),
    f(316, "TTEST", 4, 4),
    f(317, "PROB", 3, 4),
    f(318, "DEVSQ", 1, V),
    f(319, "GEOMEAN", 1, V),
    f(320, "HARMEAN", 1, V),
    f(321, "SUMSQ", 0, V),
    f(322, "KURT", 1, V),
    f(323, "SKEW", 1, V),
    f(324, "ZTEST", 2, 3),
    f(325, "LARGE", 2, 2),
    f(326, "SMALL", 2, 2),
    f(327, "QUARTILE", 2, 2),
    f(328, "PERCENTILE", 2, 2),
    f(329, "PERCENTRANK", 2, 3),
    f(330, "MODE", 1, V),
    f(331, "TRIMMEAN", 2, 2),
    f(332, "TINV", 2, 2),
    f(336, "CONCATENATE", 0, V),
    f(337, "POWER", 2, 2),
    f(342, "RADIANS", 1, 1),
    f(343, "DEGREES", 1, 1),
    f(344, "SUBTOTAL", 2, V),
    f(345, "SUMIF", 2, 3),
    f(346, "COUNTIF", 2, 2),
    f(347, "COUNTBLANK", 1, 1),
    f(350, "ISPMT", 4, 4),
    f(351, "DATEDIF", 3, 3),
    f(354, "ROMAN", 1, 2),
    f(358, "GETPIVOTDATA", 2, V),
    f(359, "HYPERLINK", 1, 2),
    f(361, "AVERAGEA", 1, V),
    f(362, "MAXA", 1, V),
    f(363, "MINA", 1, V),
    f(364, "STDEVPA", 1, V),
    f(365, "VARPA", 1, V),
    f(366, "STDEVA", 1, V),
    f(367, "VARA", 1, V),
];

static BY_NAME: Lazy<AHashMap<&'static str, &'static FunctionSpec>> =
    Lazy::new(|| FUNCTION_SPECS.iter().map(|spec| (spec.name, spec)).collect());

static BY_INDEX: Lazy<AHashMap<u16, &'static FunctionSpec>> =
    Lazy::new(|| FUNCTION_SPECS.iter().map(|spec| (spec.index, spec)).collect());

/// Look up a function by name (case-insensitive)
pub fn by_name(name: &str) -> Option<&'static FunctionSpec> {
    BY_NAME.get(name.trim().to_ascii_uppercase().as_str()).copied()
}

/// Look up a function by its table index
pub fn by_index(index: u16) -> Option<&'static FunctionSpec> {
    BY_INDEX.get(&index).copied()
}

/// Index of the SUM function, used for the `PtgAttrSum` shortcut
pub const SUM_INDEX: u16 = 4;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(by_name("sum").map(|s| s.index), Some(4));
        assert_eq!(by_name(" VLOOKUP ").map(|s| s.index), Some(102));
        assert!(by_name("NOSUCHFUNCTION").is_none());
    }

    #[test]
    fn test_lookup_by_index() {
        assert_eq!(by_index(1).map(|s| s.name), Some("IF"));
        assert_eq!(by_index(SUM_INDEX).map(|s| s.name), Some("SUM"));
        assert!(by_index(9999).is_none());
    }

    #[test]
    fn test_table_has_unique_entries() {
        assert_eq!(BY_NAME.len(), FUNCTION_SPECS.len());
        assert_eq!(BY_INDEX.len(), FUNCTION_SPECS.len());
    }

    #[test]
    fn test_arity() {
        let round = by_name("ROUND").unwrap();
        assert!(round.is_fixed_arity());
        assert!(round.accepts(2));
        assert!(!round.accepts(1));

        let now = by_name("NOW").unwrap();
        assert!(now.volatile);
        assert_eq!(by_name("IF").unwrap().arity_text(), "2..3");
    }
}
