//! CICS response codes (EIBRESP values).
//!
//! The table is closed: every condition name a translated program can test
//! with `DFHRESP(name)` maps to the numeric value CICS returns in EIBRESP.
//! [`Condition`] folds those codes into the few classes programs branch on.

use serde::{Deserialize, Serialize};

macro_rules! response_table {
    ($($variant:ident = $code:literal => $name:literal,)*) => {
        /// CICS response codes (EIBRESP values).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u32)]
        pub enum CicsResponse {
            $(
                #[doc = $name]
                $variant = $code,
            )*
        }

        impl CicsResponse {
            /// Every response, in code order.
            pub const ALL: &'static [CicsResponse] = &[$(CicsResponse::$variant,)*];

            /// Convert from the numeric EIBRESP value.
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($code => Some(CicsResponse::$variant),)*
                    _ => None,
                }
            }

            /// Get the condition name.
            pub fn condition_name(&self) -> &'static str {
                match self {
                    $(CicsResponse::$variant => $name,)*
                }
            }
        }
    };
}

response_table! {
    Normal = 0 => "NORMAL",
    Error = 1 => "ERROR",
    Rdatt = 2 => "RDATT",
    Wrbrk = 3 => "WRBRK",
    Eof = 4 => "EOF",
    Eods = 5 => "EODS",
    Eoc = 6 => "EOC",
    Inbfmh = 7 => "INBFMH",
    Endinpt = 8 => "ENDINPT",
    Nonval = 9 => "NONVAL",
    Nostart = 10 => "NOSTART",
    Termiderr = 11 => "TERMIDERR",
    Filenotfound = 12 => "FILENOTFOUND",
    Notfnd = 13 => "NOTFND",
    Duprec = 14 => "DUPREC",
    Dupkey = 15 => "DUPKEY",
    Invreq = 16 => "INVREQ",
    Ioerr = 17 => "IOERR",
    Nospace = 18 => "NOSPACE",
    Notopen = 19 => "NOTOPEN",
    Endfile = 20 => "ENDFILE",
    Illogic = 21 => "ILLOGIC",
    Lengerr = 22 => "LENGERR",
    Qzero = 23 => "QZERO",
    Signal = 24 => "SIGNAL",
    Qbusy = 25 => "QBUSY",
    Itemerr = 26 => "ITEMERR",
    Pgmiderr = 27 => "PGMIDERR",
    Transiderr = 28 => "TRANSIDERR",
    Enddata = 29 => "ENDDATA",
    Invtsreq = 30 => "INVTSREQ",
    Expired = 31 => "EXPIRED",
    Retpage = 32 => "RETPAGE",
    Rtefail = 33 => "RTEFAIL",
    Rtesome = 34 => "RTESOME",
    Tsioerr = 35 => "TSIOERR",
    Mapfail = 36 => "MAPFAIL",
    Inverrterm = 37 => "INVERRTERM",
    Invmpsz = 38 => "INVMPSZ",
    Igreqid = 39 => "IGREQID",
    Overflow = 40 => "OVERFLOW",
    Invldc = 41 => "INVLDC",
    Nostg = 42 => "NOSTG",
    Jiderr = 43 => "JIDERR",
    Qiderr = 44 => "QIDERR",
    Nojbufsp = 45 => "NOJBUFSP",
    Dsstat = 46 => "DSSTAT",
    Selnerr = 47 => "SELNERR",
    Funcerr = 48 => "FUNCERR",
    Unexpin = 49 => "UNEXPIN",
    Nopassbkrd = 50 => "NOPASSBKRD",
    Nopassbkwr = 51 => "NOPASSBKWR",
    Sysiderr = 53 => "SYSIDERR",
    Iscinvreq = 54 => "ISCINVREQ",
    Enqbusy = 55 => "ENQBUSY",
    Envdeferr = 56 => "ENVDEFERR",
    Igreqcd = 57 => "IGREQCD",
    Sessionerr = 58 => "SESSIONERR",
    Sysbusy = 59 => "SYSBUSY",
    Sessbusy = 60 => "SESSBUSY",
    Notalloc = 61 => "NOTALLOC",
    Cbiderr = 62 => "CBIDERR",
    Invexitreq = 63 => "INVEXITREQ",
    Invpartnset = 64 => "INVPARTNSET",
    Invpartn = 65 => "INVPARTN",
    Partnfail = 66 => "PARTNFAIL",
    Useriderr = 69 => "USERIDERR",
    Notauth = 70 => "NOTAUTH",
    Voliderr = 71 => "VOLIDERR",
    Suppressed = 72 => "SUPPRESSED",
    Residerr = 75 => "RESIDERR",
    Nospool = 80 => "NOSPOOL",
    Termerr = 81 => "TERMERR",
    Rolledback = 82 => "ROLLEDBACK",
    End = 83 => "END",
    Disabled = 84 => "DISABLED",
    Allocerr = 85 => "ALLOCERR",
    Strelerr = 86 => "STRELERR",
    Openerr = 87 => "OPENERR",
    Spolbusy = 88 => "SPOLBUSY",
    Spolerr = 89 => "SPOLERR",
    Nodeiderr = 90 => "NODEIDERR",
    Taskiderr = 91 => "TASKIDERR",
    Tciderr = 92 => "TCIDERR",
    Dsnnotfound = 93 => "DSNNOTFOUND",
    Loading = 94 => "LOADING",
    Modeliderr = 95 => "MODELIDERR",
    Outdescrerr = 96 => "OUTDESCRERR",
    Partneriderr = 97 => "PARTNERIDERR",
    Profileiderr = 98 => "PROFILEIDERR",
    Netnameiderr = 99 => "NETNAMEIDERR",
    Locked = 100 => "LOCKED",
    Recordbusy = 101 => "RECORDBUSY",
    Uownotfound = 102 => "UOWNOTFOUND",
    Uowlnotfound = 103 => "UOWLNOTFOUND",
    Linkabend = 104 => "LINKABEND",
    Changed = 105 => "CHANGED",
    Processbusy = 106 => "PROCESSBUSY",
    Activitybusy = 107 => "ACTIVITYBUSY",
    Processerr = 108 => "PROCESSERR",
    Activityerr = 109 => "ACTIVITYERR",
    Containererr = 110 => "CONTAINERERR",
    Eventerr = 111 => "EVENTERR",
    Tokenerr = 112 => "TOKENERR",
    Notfinished = 113 => "NOTFINISHED",
    Poolerr = 114 => "POOLERR",
    Timererr = 115 => "TIMERERR",
    Symbolerr = 116 => "SYMBOLERR",
    Templaterr = 117 => "TEMPLATERR",
    Notsuperuser = 118 => "NOTSUPERUSER",
    Csderr = 119 => "CSDERR",
    Dupres = 120 => "DUPRES",
    Resunavail = 121 => "RESUNAVAIL",
    Channelerr = 122 => "CHANNELERR",
    Ccsiderr = 123 => "CCSIDERR",
    Timedout = 124 => "TIMEDOUT",
    Codepageerr = 125 => "CODEPAGEERR",
    Incomplete = 126 => "INCOMPLETE",
    Appnotfound = 127 => "APPNOTFOUND",
    Busy = 128 => "BUSY",
}

impl CicsResponse {
    /// Look up a condition by name, as written in `DFHRESP(name)`.
    ///
    /// `DSIDERR` is accepted as the older spelling of FILENOTFOUND.
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.trim().to_uppercase();
        if upper == "DSIDERR" {
            return Some(CicsResponse::Filenotfound);
        }
        Self::ALL
            .iter()
            .copied()
            .find(|resp| resp.condition_name() == upper)
    }

    /// Numeric EIBRESP value.
    pub fn code(&self) -> u32 {
        *self as u32
    }

    /// Classified condition for branching.
    pub fn condition(&self) -> Condition {
        Condition::classify(self.code())
    }
}

/// `DFHRESP(name)` — numeric value of a condition name, if it exists.
pub fn dfhresp(name: &str) -> Option<u32> {
    CicsResponse::from_name(name).map(|resp| resp.code())
}

/// Condition classes that transaction programs branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Normal,
    Error,
    Disabled,
    FileNotFound,
    NotFnd,
    IoErr,
    NotOpen,
    EndFile,
    MapFail,
}

impl Condition {
    /// Classify a raw EIBRESP value. Codes outside the classified subset
    /// count as [`Condition::Error`].
    pub fn classify(code: u32) -> Self {
        match CicsResponse::from_u32(code) {
            Some(CicsResponse::Normal) => Condition::Normal,
            Some(CicsResponse::Disabled) => Condition::Disabled,
            Some(CicsResponse::Filenotfound) => Condition::FileNotFound,
            Some(CicsResponse::Notfnd) => Condition::NotFnd,
            Some(CicsResponse::Ioerr) => Condition::IoErr,
            Some(CicsResponse::Notopen) => Condition::NotOpen,
            Some(CicsResponse::Endfile) => Condition::EndFile,
            Some(CicsResponse::Mapfail) => Condition::MapFail,
            _ => Condition::Error,
        }
    }
}
