// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.
use std::fmt;
use std::str::FromStr;

/// Id of one user request; all of its subrequests share it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct RequestId(pub i64);

impl RequestId {
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn as_i64(self) -> i64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of one subrequest sent to a single connector.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AtomicRequestId {
    pub request_id: RequestId,
    pub subrequest_id: u32,
}

impl AtomicRequestId {
    pub const fn new(request_id: RequestId, subrequest_id: u32) -> Self {
        Self {
            request_id,
            subrequest_id,
        }
    }
}

impl fmt::Display for AtomicRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.request_id, self.subrequest_id)
    }
}

impl FromStr for AtomicRequestId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (request, sub) = s
            .split_once('.')
            .ok_or_else(|| format!("invalid atomic request id '{}': missing '.'", s))?;
        let request = request
            .parse::<i64>()
            .map_err(|e| format!("invalid request id in '{}': {}", s, e))?;
        let sub = sub
            .parse::<u32>()
            .map_err(|e| format!("invalid subrequest id in '{}': {}", s, e))?;
        Ok(Self::new(RequestId(request), sub))
    }
}
