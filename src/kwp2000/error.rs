//! KWP2000 negative response code taxonomy

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
/// KWP Error definitions
pub enum KwpError {
    /// ECU rejected the request for unknown reason
    GeneralReject,
    /// ECU Does not support the requested service
    ServiceNotSupported,
    /// ECU does not support arguments provided, or message format is incorrect
    SubFunctionNotSupportedInvalidFormat,
    /// The request message length did not match the service definition
    IncorrectMessageLengthOrInvalidFormat,
    /// ECU is too busy to perform the request
    BusyRepeatRequest,
    /// ECU prerequisite conditions are not met
    ConditionsNotCorrectRequestSequenceError,
    /// Requested results of a routine that is not completed
    RoutineNotComplete,
    /// The request message contains data which is out of range
    RequestOutOfRange,
    /// Security access is denied
    SecurityAccessDenied,
    /// Invalid key provided to the ECU
    InvalidKey,
    /// Exceeded the number of incorrect security access attempts
    ExceedNumberOfAttempts,
    /// Time period for requesting a new seed not expired
    RequiredTimeDelayNotExpired,
    /// ECU fault prevents data download
    DownloadNotAccepted,
    /// Download type is not supported
    ImproperDownloadType,
    /// ECU cannot download data to the requested address
    CantDownloadToSpecifiedAddress,
    /// ECU cannot download the requested number of bytes
    CantDownloadNumberOfBytesRequested,
    /// ECU fault prevents data upload
    UploadNotAccepted,
    /// Upload type is not supported
    ImproperUploadType,
    /// ECU cannot upload data from the requested address
    CantUploadFromSpecifiedAddress,
    /// ECU cannot upload the requested number of bytes
    CantUploadNumberOfBytesRequested,
    /// ECU fault has stopped the transfer of data
    TransferSuspended,
    /// The data transfer was aborted
    TransferAborted,
    /// Illegal address in block transfer
    IllegalAddressInBlockTransfer,
    /// Illegal byte count in block transfer
    IllegalByteCountInBlockTransfer,
    /// Illegal block transfer type
    IllegalBlockTransferType,
    /// Checksum error in transferred block
    BlockTransferDataChecksumError,
    /// The ECU has accepted the request, but cannot reply right now.
    /// The client wait loop absorbs this code; it never surfaces to a caller
    RequestCorrectlyReceivedResponsePending,
    /// Incorrect byte count during block transfer
    IncorrectByteCountDuringBlockTransfer,
    /// Requested service is not supported in the current diagnostic session mode
    ServiceNotSupportedInActiveSession,
    /// Data decompression failed
    DataDecompressionFailed,
    /// Data decryption failed
    DataDecryptionFailed,
    /// Sent by a gateway ECU. The requested ECU behind the gateway is not responding
    EcuNotResponding,
    /// Sent by a gateway ECU. The requested ECU address is unknown
    EcuAddressUnknown,
    /// NRC not covered by the fixed table
    Unknown(u8),
}

impl From<u8> for KwpError {
    fn from(p: u8) -> Self {
        match p {
            0x10 => Self::GeneralReject,
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupportedInvalidFormat,
            0x13 => Self::IncorrectMessageLengthOrInvalidFormat,
            0x21 => Self::BusyRepeatRequest,
            0x22 => Self::ConditionsNotCorrectRequestSequenceError,
            0x23 => Self::RoutineNotComplete,
            0x31 => Self::RequestOutOfRange,
            0x33 => Self::SecurityAccessDenied,
            0x35 => Self::InvalidKey,
            0x36 => Self::ExceedNumberOfAttempts,
            0x37 => Self::RequiredTimeDelayNotExpired,
            0x40 => Self::DownloadNotAccepted,
            0x41 => Self::ImproperDownloadType,
            0x42 => Self::CantDownloadToSpecifiedAddress,
            0x43 => Self::CantDownloadNumberOfBytesRequested,
            0x50 => Self::UploadNotAccepted,
            0x51 => Self::ImproperUploadType,
            0x52 => Self::CantUploadFromSpecifiedAddress,
            0x53 => Self::CantUploadNumberOfBytesRequested,
            0x71 => Self::TransferSuspended,
            0x72 => Self::TransferAborted,
            0x74 => Self::IllegalAddressInBlockTransfer,
            0x75 => Self::IllegalByteCountInBlockTransfer,
            0x76 => Self::IllegalBlockTransferType,
            0x77 => Self::BlockTransferDataChecksumError,
            0x78 => Self::RequestCorrectlyReceivedResponsePending,
            0x79 => Self::IncorrectByteCountDuringBlockTransfer,
            0x80 => Self::ServiceNotSupportedInActiveSession,
            0x9A => Self::DataDecompressionFailed,
            0x9B => Self::DataDecryptionFailed,
            0xA0 => Self::EcuNotResponding,
            0xA1 => Self::EcuAddressUnknown,
            x => Self::Unknown(x),
        }
    }
}

impl KwpError {
    /// Returns the protocol definition string for the NRC
    pub fn desc(&self) -> &'static str {
        match self {
            Self::GeneralReject => "generalReject",
            Self::ServiceNotSupported => "serviceNotSupported",
            Self::SubFunctionNotSupportedInvalidFormat => "subFunctionNotSupported-invalidFormat",
            Self::IncorrectMessageLengthOrInvalidFormat => "incorrectMessageLengthOrInvalidFormat",
            Self::BusyRepeatRequest => "busy-RepeatRequest",
            Self::ConditionsNotCorrectRequestSequenceError => {
                "conditionsNotCorrect or requestSequenceError"
            }
            Self::RoutineNotComplete => "routineNotComplete",
            Self::RequestOutOfRange => "requestOutOfRange",
            Self::SecurityAccessDenied => "securityAccessDenied",
            Self::InvalidKey => "invalidKey",
            Self::ExceedNumberOfAttempts => "exceedNumberOfAttempts",
            Self::RequiredTimeDelayNotExpired => "requiredTimeDelayNotExpired",
            Self::DownloadNotAccepted => "downloadNotAccepted",
            Self::ImproperDownloadType => "improperDownloadType",
            Self::CantDownloadToSpecifiedAddress => "cantDownloadToSpecifiedAddress",
            Self::CantDownloadNumberOfBytesRequested => "cantDownloadNumberOfBytesRequested",
            Self::UploadNotAccepted => "uploadNotAccepted",
            Self::ImproperUploadType => "improperUploadType",
            Self::CantUploadFromSpecifiedAddress => "cantUploadFromSpecifiedAddress",
            Self::CantUploadNumberOfBytesRequested => "cantUploadNumberOfBytesRequested",
            Self::TransferSuspended => "transferSuspended",
            Self::TransferAborted => "transferAborted",
            Self::IllegalAddressInBlockTransfer => "illegalAddressInBlockTransfer",
            Self::IllegalByteCountInBlockTransfer => "illegalByteCountInBlockTransfer",
            Self::IllegalBlockTransferType => "illegalBlockTransferType",
            Self::BlockTransferDataChecksumError => "blockTransferDataChecksumError",
            Self::RequestCorrectlyReceivedResponsePending => {
                "reqCorrectlyRcvd-RspPending(requestCorrectlyReceived-ResponsePending)"
            }
            Self::IncorrectByteCountDuringBlockTransfer => {
                "incorrectByteCountDuringBlockTransfer"
            }
            Self::ServiceNotSupportedInActiveSession => {
                "subFunctionNotSupportedInActiveDiagnosticSession"
            }
            Self::DataDecompressionFailed => "dataDecompressionFailed",
            Self::DataDecryptionFailed => "dataDecryptionFailed",
            Self::EcuNotResponding => "EcuNotResponding",
            Self::EcuAddressUnknown => "EcuAddressUnknown",
            Self::Unknown(_) => "unknown negative response code",
        }
    }

    /// Returns true if the ECU signalled it is busy and the request may be
    /// repeated
    pub fn is_repeat_request(&self) -> bool {
        *self == KwpError::BusyRepeatRequest
    }

    /// Returns true if the requested service is unavailable in the active
    /// diagnostic session mode
    pub fn is_wrong_diag_mode(&self) -> bool {
        *self == KwpError::ServiceNotSupportedInActiveSession
    }
}

impl std::fmt::Display for KwpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown(x) => write!(f, "unknown NRC 0x{x:02X}"),
            other => write!(f, "{}", other.desc()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nrc_lookup() {
        assert_eq!(KwpError::from(0x10), KwpError::GeneralReject);
        assert_eq!(KwpError::from(0x21), KwpError::BusyRepeatRequest);
        assert_eq!(
            KwpError::from(0x78),
            KwpError::RequestCorrectlyReceivedResponsePending
        );
        assert_eq!(KwpError::from(0xA1), KwpError::EcuAddressUnknown);
        assert_eq!(KwpError::from(0xF0), KwpError::Unknown(0xF0));
        assert_eq!(KwpError::from(0x33).desc(), "securityAccessDenied");
    }
}
